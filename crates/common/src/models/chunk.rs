//! Chunk arena
//!
//! Chunks form a tree: depth-0 chunks partition the document, each deeper
//! chunk is a sub-range of exactly one parent. The tree is stored as a flat
//! arena indexed by `ChunkId`, parents are referenced by id.

use serde::{Deserialize, Serialize};

/// Index of a chunk inside its `ChunkTree`
pub type ChunkId = usize;

/// Half-open `[start, end)` range in document-global character positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharRange {
    pub start: usize,
    pub end: usize,
}

impl CharRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "inverted range {start}..{end}");
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True when `other` lies fully inside this range
    pub fn contains_range(&self, other: &CharRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Shift a chunk-local range into document coordinates
    pub fn offset(&self, base: usize) -> CharRange {
        CharRange::new(self.start + base, self.end + base)
    }
}

impl std::fmt::Display for CharRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Segmenter output before it is placed in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Document-global character range
    pub char_range: CharRange,

    /// Verbatim text of the range
    pub text: String,

    /// Deterministic token estimate
    pub token_estimate: usize,

    /// A single sentence unit larger than the budget it was packed under
    pub oversized: bool,
}

/// A node of the chunk tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Arena index, also the id the models cite
    pub id: ChunkId,

    /// 0 for the coarse partition, +1 per refinement step
    pub depth: usize,

    /// Enclosing chunk one level up
    pub parent_id: Option<ChunkId>,

    /// Verbatim text
    pub text: String,

    /// Document-global character range
    pub char_range: CharRange,

    /// Deterministic token estimate
    pub token_estimate: usize,

    /// Oversized unsplittable sentence unit
    #[serde(default)]
    pub oversized: bool,
}

/// Arena of chunks across every depth of one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkTree {
    chunks: Vec<Chunk>,
}

impl ChunkTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append segments as chunks at `depth`, returning their ids in order
    pub fn insert_segments(
        &mut self,
        depth: usize,
        parent_id: Option<ChunkId>,
        segments: Vec<Segment>,
    ) -> Vec<ChunkId> {
        let parent_range = parent_id.and_then(|id| self.get(id)).map(|p| p.char_range);

        segments
            .into_iter()
            .map(|segment| {
                if let Some(range) = parent_range {
                    debug_assert!(
                        range.contains_range(&segment.char_range),
                        "sub-chunk {} escapes parent {}",
                        segment.char_range,
                        range
                    );
                }
                let id = self.chunks.len();
                self.chunks.push(Chunk {
                    id,
                    depth,
                    parent_id,
                    text: segment.text,
                    char_range: segment.char_range,
                    token_estimate: segment.token_estimate,
                    oversized: segment.oversized,
                });
                id
            })
            .collect()
    }

    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    /// Chunks at a given depth, in document order
    pub fn at_depth(&self, depth: usize) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(move |c| c.depth == depth)
    }

    /// Direct children of `id`, in document order
    pub fn children(&self, id: ChunkId) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(move |c| c.parent_id == Some(id))
    }

    /// Resolve a list of ids, skipping unknown ones
    pub fn resolve<'a>(&'a self, ids: &'a [ChunkId]) -> impl Iterator<Item = &'a Chunk> + 'a {
        ids.iter().filter_map(move |id| self.get(*id))
    }

    /// Deepest depth present in the tree
    pub fn max_depth(&self) -> usize {
        self.chunks.iter().map(|c| c.depth).max().unwrap_or(0)
    }

    /// Number of oversized chunks recorded
    pub fn oversized_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.oversized).count()
    }
}
