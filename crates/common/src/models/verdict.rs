//! Filter verdicts and fragment sets

use super::chunk::{ChunkId, ChunkTree};
use serde::{Deserialize, Serialize};

/// Which pass of the relevance filter produced a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Over depth-0 chunks
    Coarse,
    /// Over sub-chunks of surviving fragments
    Fine,
}

impl FilterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterMode::Coarse => "coarse",
            FilterMode::Fine => "fine",
        }
    }
}

impl std::fmt::Display for FilterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relevance judgement for one chunk in one filter pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterVerdict {
    pub chunk_id: ChunkId,

    pub is_relevant: bool,

    /// Clamped to [0, 1]
    pub relevance: f32,

    pub reasoning: String,

    /// The verdict was synthesized because the model output could not be used
    #[serde(default)]
    pub parse_failure: bool,
}

impl FilterVerdict {
    pub fn new(chunk_id: ChunkId, is_relevant: bool, relevance: f32, reasoning: String) -> Self {
        let relevance = if relevance.is_finite() {
            relevance.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            chunk_id,
            is_relevant,
            relevance,
            reasoning,
            parse_failure: false,
        }
    }

    /// The model said nothing about this chunk
    pub fn omitted(chunk_id: ChunkId) -> Self {
        Self::new(
            chunk_id,
            false,
            0.0,
            "no verdict returned by the model; treated as not relevant".to_string(),
        )
    }

    /// The batch containing this chunk produced no usable output
    pub fn parse_failure(chunk_id: ChunkId, message: &str) -> Self {
        Self {
            parse_failure: true,
            ..Self::new(
                chunk_id,
                false,
                0.0,
                format!("filter parse failure, treated as not relevant: {message}"),
            )
        }
    }
}

/// Ordered, duplicate-free chunk ids in document order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentSet {
    ids: Vec<ChunkId>,
}

impl FragmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from arbitrary ids, sorted by document position.
    /// Ids unknown to the tree are dropped.
    pub fn from_ids(ids: impl IntoIterator<Item = ChunkId>, tree: &ChunkTree) -> Self {
        let mut ids: Vec<ChunkId> = ids.into_iter().filter(|id| tree.get(*id).is_some()).collect();
        ids.sort_by_key(|id| {
            let position = tree
                .get(*id)
                .map(|c| (c.char_range.start, c.depth))
                .unwrap_or((usize::MAX, usize::MAX));
            (position, *id)
        });
        ids.dedup();
        Self { ids }
    }

    pub fn ids(&self) -> &[ChunkId] {
        &self.ids
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.ids.iter().copied()
    }
}
