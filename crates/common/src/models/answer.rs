//! Synthesis and verification results

use super::chunk::ChunkId;
use serde::{Deserialize, Serialize};

/// Grounded answer with the fragment ids it drew on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,

    /// Subset of the fragments handed to the synthesizer, in citation order
    pub cited_fragment_ids: Vec<ChunkId>,
}

/// Advisory verdict of the verifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_correct: bool,

    pub reasoning: String,
}
