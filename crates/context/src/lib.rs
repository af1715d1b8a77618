//! DocNav Context Engine
//!
//! Question answering over one long document:
//! - Coarse-to-fine relevance navigation over a chunk tree
//! - Answer synthesis restricted to the surviving fragments, with citations
//! - Independent, advisory verification of the answer
//! - One markdown audit record per query

pub mod audit;
pub mod engine;
pub mod filter;
pub mod input_parser;
pub mod navigator;
pub mod prompts;
pub mod synthesizer;
pub mod verifier;

mod structured;

#[cfg(test)]
pub(crate) mod test_support;

pub use audit::AuditRecorder;
pub use engine::{QueryEngine, QueryOutcome};
pub use filter::{FilterOutcome, RelevanceFilter};
pub use input_parser::InputParser;
pub use navigator::{Navigation, Navigator};
pub use synthesizer::{Synthesis, Synthesizer};
pub use verifier::Verifier;
