//! Loaded document

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Immutable text of one document plus metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Source path as given by the caller
    pub path: PathBuf,

    /// Cleaned full text
    pub text: String,

    /// Number of characters (Unicode scalar values) in `text`
    pub char_count: usize,

    /// Deterministic token estimate for the whole text
    pub token_estimate: usize,

    /// Hex SHA-256 of `text`
    pub fingerprint: String,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, text: String, token_estimate: usize) -> Self {
        let fingerprint = hex::encode(Sha256::digest(text.as_bytes()));
        Self {
            path: path.into(),
            char_count: text.chars().count(),
            text,
            token_estimate,
            fingerprint,
        }
    }

    /// Short preview used in logs
    pub fn preview(&self, max_chars: usize) -> String {
        self.text.chars().take(max_chars).collect()
    }
}
