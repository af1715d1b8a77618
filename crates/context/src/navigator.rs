//! Hierarchical navigation
//!
//! Narrows a document down to the fragments that answer a question:
//! 1. segment the document at the coarse budget and run a coarse pass
//! 2. re-segment every surviving fragment above the minimum granularity at
//!    a finer budget and run a fine pass over the sub-chunks
//! 3. repeat until fragments are small enough, the depth limit is hit, or a
//!    fine pass selects nothing
//!
//! A fragment that no longer splits is judged once more as it is. A fine pass
//! drops every parent none of whose sub-chunks survive; only a fine pass that
//! selects nothing at all keeps the previous fragments. Every pass is written
//! into the query's audit record.

use crate::filter::{FilterOutcome, RelevanceFilter};
use chrono::{DateTime, Utc};
use docnav_common::config::NavigationConfig;
use docnav_common::errors::{AppError, Result};
use docnav_common::models::{
    BatchNote, Chunk, ChunkId, ChunkTree, Document, FilterMode, FilterPass, FragmentSet, QaRecord,
    StopReason,
};
use docnav_ingestion::Segmenter;
use std::collections::HashSet;
use tracing::{debug, info, instrument};

/// Final state of one navigation
#[derive(Debug, Clone)]
pub struct Navigation {
    /// Every chunk created, at every depth
    pub tree: ChunkTree,

    /// Fragments handed to synthesis, in document order
    pub fragments: FragmentSet,

    pub stop_reason: StopReason,

    /// Number of fine passes that ran
    pub fine_passes: usize,
}

impl Navigation {
    /// Resolve the fragment ids to chunks
    pub fn fragment_chunks(&self) -> Vec<&Chunk> {
        self.tree.resolve(self.fragments.ids()).collect()
    }
}

/// Coarse-to-fine navigator
pub struct Navigator {
    segmenter: Segmenter,
    filter: RelevanceFilter,
    config: NavigationConfig,
}

impl Navigator {
    pub fn new(segmenter: Segmenter, filter: RelevanceFilter, config: NavigationConfig) -> Self {
        Self {
            segmenter,
            filter,
            config,
        }
    }

    /// Navigate `document` for `question`, logging every pass into `record`.
    ///
    /// On error the chunk tree built so far is still copied into the record.
    #[instrument(skip_all, fields(query_id = %record.query_id))]
    pub async fn navigate(
        &self,
        question: &str,
        document: &Document,
        record: &mut QaRecord,
    ) -> Result<Navigation> {
        let mut tree = ChunkTree::new();
        let result = self.run(question, document, record, &mut tree).await;
        record.chunk_tree = tree.clone();

        let (fragments, stop_reason, fine_passes) = result?;
        record.final_fragments = fragments.clone();
        record.stop_reason = Some(stop_reason);

        info!(
            fragments = fragments.len(),
            chunks = tree.len(),
            fine_passes,
            stop_reason = ?stop_reason,
            "Navigation finished"
        );

        Ok(Navigation {
            tree,
            fragments,
            stop_reason,
            fine_passes,
        })
    }

    async fn run(
        &self,
        question: &str,
        document: &Document,
        record: &mut QaRecord,
        tree: &mut ChunkTree,
    ) -> Result<(FragmentSet, StopReason, usize)> {
        let segments = self
            .segmenter
            .segment(&document.text, self.config.token_budget_at(0), 0);
        let roots = tree.insert_segments(0, None, segments);
        info!(
            chunks = roots.len(),
            oversized = tree.oversized_count(),
            budget = self.config.token_budget_at(0),
            "Document segmented"
        );

        let started_at = Utc::now();
        let candidates: Vec<&Chunk> = tree.resolve(&roots).collect();
        let coarse = self
            .filter
            .filter(question, &candidates, tree, FilterMode::Coarse, &[])
            .await?;
        record.push_pass(pass_record(0, FilterMode::Coarse, roots, &coarse, started_at, Vec::new(), Vec::new()));

        if coarse.selected.is_empty() {
            info!("Coarse pass selected nothing");
            return Ok((FragmentSet::new(), StopReason::NoRelevantContent, 0));
        }

        let mut current = coarse.selected;
        let mut notes: Vec<BatchNote> = coarse.notes;
        let mut settled: HashSet<ChunkId> = HashSet::new();
        let mut fine_passes = 0usize;

        loop {
            let splittable = current
                .iter()
                .filter(|id| !settled.contains(id))
                .filter_map(|id| tree.get(id))
                .any(|c| c.token_estimate > self.config.min_granularity_tokens);
            if !splittable {
                return Ok((current, StopReason::Granularity, fine_passes));
            }
            if fine_passes >= self.config.max_depth {
                return Ok((current, StopReason::MaxDepth, fine_passes));
            }

            let budget = self.config.token_budget_at(fine_passes + 1);
            let mut carried: Vec<ChunkId> = Vec::new();
            let mut splits: Vec<(ChunkId, Vec<ChunkId>)> = Vec::new();

            for id in current.iter() {
                let (depth, segments) = {
                    let chunk = tree.get(id).ok_or_else(|| AppError::Internal {
                        message: format!("fragment {} missing from chunk tree", id),
                    })?;
                    if settled.contains(&id) || chunk.token_estimate <= self.config.min_granularity_tokens {
                        carried.push(id);
                        continue;
                    }
                    (chunk.depth, self.segmenter.segment_chunk(chunk, budget))
                };

                if segments.len() <= 1 {
                    debug!(chunk_id = id, "Fragment cannot be split further, judging it whole");
                    settled.insert(id);
                    splits.push((id, vec![id]));
                    continue;
                }
                let children = tree.insert_segments(depth + 1, Some(id), segments);
                splits.push((id, children));
            }

            if splits.is_empty() {
                return Ok((current, StopReason::Granularity, fine_passes));
            }

            fine_passes += 1;
            let candidate_ids: Vec<ChunkId> = splits.iter().flat_map(|(_, c)| c.iter().copied()).collect();
            let depth = candidate_ids
                .iter()
                .filter_map(|id| tree.get(*id))
                .map(|c| c.depth)
                .max()
                .unwrap_or(fine_passes);

            let started_at = Utc::now();
            let candidates: Vec<&Chunk> = tree.resolve(&candidate_ids).collect();
            let fine = self
                .filter
                .filter(question, &candidates, tree, FilterMode::Fine, &notes)
                .await?;

            let empty_pass = fine.selected.is_empty();
            let mut next: Vec<ChunkId> = carried.clone();
            let mut retained: Vec<ChunkId> = Vec::new();
            if empty_pass {
                retained.extend(splits.iter().map(|(parent, _)| *parent));
                next.extend(retained.iter().copied());
            } else {
                next.extend(
                    candidate_ids
                        .iter()
                        .copied()
                        .filter(|c| fine.selected.contains(*c)),
                );
            }

            debug!(
                pass = fine_passes,
                selected = fine.selected.len(),
                retained_parents = retained.len(),
                carried = carried.len(),
                "Fine pass merged"
            );

            record.push_pass(pass_record(depth, FilterMode::Fine, candidate_ids, &fine, started_at, retained, carried));

            current = FragmentSet::from_ids(next, tree);
            if !fine.notes.is_empty() {
                notes = fine.notes;
            }

            if empty_pass {
                info!(pass = fine_passes, "Fine pass selected nothing, keeping parent fragments");
                return Ok((current, StopReason::EmptyFinePass, fine_passes));
            }
        }
    }
}

fn pass_record(
    depth: usize,
    mode: FilterMode,
    candidate_ids: Vec<ChunkId>,
    outcome: &FilterOutcome,
    started_at: DateTime<Utc>,
    retained_parents: Vec<ChunkId>,
    carried: Vec<ChunkId>,
) -> FilterPass {
    FilterPass {
        depth,
        mode,
        candidate_ids,
        verdicts: outcome.verdicts.clone(),
        selected: outcome.selected.clone(),
        retained_parents,
        carried,
        notes: outcome.notes.clone(),
        failures: outcome.failures.clone(),
        started_at,
        finished_at: Utc::now(),
    }
}
