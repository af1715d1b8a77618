//! Per-query audit aggregate
//!
//! A `QaRecord` is created when a query starts, threaded through navigation,
//! synthesis and verification, and handed by value to the audit recorder at
//! the end. It owns copies of everything it logs.

use super::answer::{Answer, VerificationResult};
use super::chunk::{ChunkId, ChunkTree};
use super::document::Document;
use super::verdict::{FilterMode, FilterVerdict, FragmentSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why the navigator stopped narrowing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The coarse pass selected nothing
    NoRelevantContent,
    /// Every surviving fragment is at or below the minimum granularity
    Granularity,
    /// The maximum number of fine passes ran
    MaxDepth,
    /// A fine pass selected no sub-chunk at all; parents were kept
    EmptyFinePass,
}

impl StopReason {
    pub fn describe(&self) -> &'static str {
        match self {
            StopReason::NoRelevantContent => "no relevant content found in coarse pass",
            StopReason::Granularity => "all fragments reached minimum granularity",
            StopReason::MaxDepth => "maximum recursion depth reached",
            StopReason::EmptyFinePass => "fine pass selected nothing; parent fragments retained",
        }
    }
}

/// Pipeline stage with its own wall-clock timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ParseInput,
    LoadDocument,
    Navigate,
    Synthesize,
    Verify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StageTiming {
    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Model notes for one filter batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNote {
    pub batch: usize,
    pub chunk_ids: Vec<ChunkId>,
    pub scratchpad: String,
}

/// A filter batch whose output was unusable after the retry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub batch: usize,
    pub chunk_ids: Vec<ChunkId>,
    pub message: String,
}

/// Everything one relevance-filter pass decided
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterPass {
    /// Depth of the candidate chunks
    pub depth: usize,

    pub mode: FilterMode,

    pub candidate_ids: Vec<ChunkId>,

    /// One verdict per candidate
    pub verdicts: Vec<FilterVerdict>,

    /// Candidates judged relevant
    pub selected: FragmentSet,

    /// Parents carried forward unchanged because the fine pass selected nothing
    #[serde(default)]
    pub retained_parents: Vec<ChunkId>,

    /// Fragments at minimum granularity carried forward without re-filtering
    #[serde(default)]
    pub carried: Vec<ChunkId>,

    #[serde(default)]
    pub notes: Vec<BatchNote>,

    #[serde(default)]
    pub failures: Vec<BatchFailure>,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,
}

/// Document facts kept in the record (the text itself lives in the chunk tree)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub char_count: usize,
    pub token_estimate: usize,
    pub fingerprint: String,
}

impl From<&Document> for DocumentSummary {
    fn from(doc: &Document) -> Self {
        Self {
            char_count: doc.char_count,
            token_estimate: doc.token_estimate,
            fingerprint: doc.fingerprint.clone(),
        }
    }
}

/// Question and path extracted from free-form input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedInputNote {
    pub question: String,
    pub document_path: String,
    pub reasoning: String,
}

/// Terminal state of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Answered,
    NoRelevantContent,
    Failed,
}

/// Append-only audit trail of one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaRecord {
    pub query_id: Uuid,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Raw user input when the query came in free-form
    pub raw_input: Option<String>,

    pub parsed_input: Option<ParsedInputNote>,

    pub question: String,

    pub document_path: String,

    pub document: Option<DocumentSummary>,

    /// Snapshot of every chunk at every depth
    pub chunk_tree: ChunkTree,

    /// Filter passes in execution order
    pub passes: Vec<FilterPass>,

    pub final_fragments: FragmentSet,

    pub stop_reason: Option<StopReason>,

    pub answer: Option<Answer>,

    /// Ids the synthesizer cited that were not among its input fragments
    pub citation_violations: Vec<ChunkId>,

    pub verification: Option<VerificationResult>,

    pub stages: Vec<StageTiming>,

    pub outcome: Option<RecordOutcome>,

    pub error: Option<String>,
}

impl QaRecord {
    /// Start a record for a structured query
    pub fn begin(question: impl Into<String>, document_path: impl Into<String>) -> Self {
        Self {
            query_id: Uuid::now_v7(),
            started_at: Utc::now(),
            finished_at: None,
            raw_input: None,
            parsed_input: None,
            question: question.into(),
            document_path: document_path.into(),
            document: None,
            chunk_tree: ChunkTree::new(),
            passes: Vec::new(),
            final_fragments: FragmentSet::new(),
            stop_reason: None,
            answer: None,
            citation_violations: Vec::new(),
            verification: None,
            stages: Vec::new(),
            outcome: None,
            error: None,
        }
    }

    /// Record a stage that ran from `started_at` until now
    pub fn stage_finished(&mut self, stage: Stage, started_at: DateTime<Utc>) {
        self.stages.push(StageTiming {
            stage,
            started_at,
            finished_at: Utc::now(),
        });
    }

    pub fn push_pass(&mut self, pass: FilterPass) {
        self.passes.push(pass);
    }

    /// Passes of one mode, in execution order
    pub fn passes_of(&self, mode: FilterMode) -> impl Iterator<Item = &FilterPass> {
        self.passes.iter().filter(move |p| p.mode == mode)
    }

    /// Total filter parse failures across all passes
    pub fn parse_failure_count(&self) -> usize {
        self.passes.iter().map(|p| p.failures.len()).sum()
    }

    /// Seal the record with its terminal outcome
    pub fn finish(&mut self, outcome: RecordOutcome) {
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
    }

    /// Seal the record as failed, keeping the error text
    pub fn fail(&mut self, error: &dyn std::fmt::Display) {
        self.error = Some(error.to_string());
        self.finish(RecordOutcome::Failed);
    }
}
