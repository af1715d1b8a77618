//! Core data model
//!
//! Types shared by segmentation, navigation, synthesis and the audit trail.

mod answer;
mod chunk;
mod document;
mod record;
mod verdict;

pub use answer::{Answer, VerificationResult};
pub use chunk::{CharRange, Chunk, ChunkId, ChunkTree, Segment};
pub use document::Document;
pub use record::{
    BatchFailure, BatchNote, DocumentSummary, FilterPass, ParsedInputNote, QaRecord,
    RecordOutcome, Stage, StageTiming, StopReason,
};
pub use verdict::{FilterMode, FilterVerdict, FragmentSet};
