//! DocNav Ingestion
//!
//! Turns a path into segmented text:
//! 1. Loads the document (PDF or plain text) and normalizes it
//! 2. Splits text into sentence units under configurable boundary rules
//! 3. Packs units into chunks under a token budget, at any depth

pub mod chunker;
pub mod errors;
pub mod loader;
pub mod pdf;

pub use chunker::{estimate_tokens, BoundaryRules, EstimationMode, Segmenter, TokenEstimator};
pub use errors::IngestionError;
pub use loader::{clean_text, DocumentSource, FsDocumentSource};
