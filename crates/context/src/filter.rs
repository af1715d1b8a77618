//! Relevance filter
//!
//! Judges candidate chunks against the question in batches:
//! - candidates are grouped under a per-call token budget, each batch keeps
//!   its own scratchpad
//! - batches run concurrently and are merged once all have returned
//! - a chunk is kept only on an explicit positive verdict; omitted ids and
//!   unusable output count as not relevant
//!
//! Timeouts and undecodable output after the retry fail the batch closed.
//! Transport errors abort the query.

use crate::prompts;
use crate::structured::{lenient_id, request_structured};
use docnav_common::errors::{AppError, Result};
use docnav_common::llm::{CompletionRequest, CompletionService};
use docnav_common::metrics;
use docnav_common::models::{
    BatchFailure, BatchNote, Chunk, ChunkId, ChunkTree, FilterMode, FilterVerdict, FragmentSet,
};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of one filter pass over a candidate set
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    /// Candidates judged relevant, in document order
    pub selected: FragmentSet,

    /// One verdict per candidate, in candidate order
    pub verdicts: Vec<FilterVerdict>,

    /// Scratchpad per batch that produced usable output
    pub notes: Vec<BatchNote>,

    /// Batches whose output was unusable
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Deserialize)]
struct FilterResponse {
    #[serde(default)]
    scratchpad: String,

    #[serde(default)]
    verdicts: Vec<RawVerdict>,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(deserialize_with = "lenient_id")]
    chunk_id: ChunkId,

    is_relevant: bool,

    #[serde(default)]
    relevance: Option<f32>,

    #[serde(default)]
    reasoning: String,
}

struct BatchResult {
    verdicts: Vec<FilterVerdict>,
    note: Option<BatchNote>,
    failure: Option<BatchFailure>,
}

/// Batched relevance filter over the router backend
pub struct RelevanceFilter {
    service: Arc<dyn CompletionService>,
    batch_token_budget: usize,
    max_concurrent_batches: usize,
}

impl RelevanceFilter {
    pub fn new(
        service: Arc<dyn CompletionService>,
        batch_token_budget: usize,
        max_concurrent_batches: usize,
    ) -> Self {
        Self {
            service,
            batch_token_budget: batch_token_budget.max(1),
            max_concurrent_batches: max_concurrent_batches.max(1),
        }
    }

    /// Judge `candidates` and return the relevant subset.
    ///
    /// `prior_notes` are the scratchpads of the previous pass; fine passes
    /// show them to the model as orientation.
    #[instrument(skip_all, fields(mode = %mode, candidates = candidates.len()))]
    pub async fn filter(
        &self,
        question: &str,
        candidates: &[&Chunk],
        tree: &ChunkTree,
        mode: FilterMode,
        prior_notes: &[BatchNote],
    ) -> Result<FilterOutcome> {
        if candidates.is_empty() {
            return Ok(FilterOutcome::default());
        }

        let notes: Vec<String> = prior_notes
            .iter()
            .map(|n| n.scratchpad.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let batches = plan_batches(candidates, self.batch_token_budget);
        debug!(batch_count = batches.len(), "Filter batches planned");

        let results: Vec<(usize, Result<BatchResult>)> = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| {
                let notes = &notes;
                async move {
                    let result = self.evaluate_batch(index, question, &batch, mode, notes).await;
                    (index, result)
                }
            })
            .buffer_unordered(self.max_concurrent_batches)
            .collect()
            .await;

        let mut ordered: Vec<(usize, BatchResult)> = Vec::with_capacity(results.len());
        for (index, result) in results {
            ordered.push((index, result?));
        }
        ordered.sort_by_key(|(index, _)| *index);

        let mut outcome = FilterOutcome::default();
        for (_, batch) in ordered {
            outcome.verdicts.extend(batch.verdicts);
            outcome.notes.extend(batch.note);
            outcome.failures.extend(batch.failure);
        }

        outcome.selected = FragmentSet::from_ids(
            outcome.verdicts.iter().filter(|v| v.is_relevant).map(|v| v.chunk_id),
            tree,
        );

        let relevant = outcome.selected.len();
        let rejected = outcome.verdicts.len() - relevant;
        metrics::record_filter_pass(mode.as_str(), relevant, rejected, outcome.failures.len());
        info!(
            relevant,
            rejected,
            failed_batches = outcome.failures.len(),
            "Filter pass complete"
        );

        Ok(outcome)
    }

    async fn evaluate_batch(
        &self,
        index: usize,
        question: &str,
        batch: &[&Chunk],
        mode: FilterMode,
        prior_notes: &[String],
    ) -> Result<BatchResult> {
        let ids: Vec<ChunkId> = batch.iter().map(|c| c.id).collect();
        let request = CompletionRequest::new(prompts::filter_prompt(question, mode, batch, prior_notes))
            .with_system(prompts::filter_system(mode))
            .with_schema(prompts::filter_schema());
        let retry = prompts::filter_retry_instruction(batch);

        match request_structured::<FilterResponse, _>(self.service.as_ref(), request, &retry, |_| Ok(())).await {
            Ok(response) => {
                let note = BatchNote {
                    batch: index,
                    chunk_ids: ids.clone(),
                    scratchpad: response.scratchpad.clone(),
                };
                Ok(BatchResult {
                    verdicts: reduce_verdicts(&ids, response),
                    note: Some(note),
                    failure: None,
                })
            }
            Err(err) if err.is_transport() => Err(AppError::completion("router", err)),
            Err(err) => {
                let message = err.to_string();
                warn!(
                    batch = index,
                    chunk_ids = ?ids,
                    error = %message,
                    "Filter batch unusable after retry, treating its chunks as not relevant"
                );
                Ok(BatchResult {
                    verdicts: ids.iter().map(|id| FilterVerdict::parse_failure(*id, &message)).collect(),
                    note: None,
                    failure: Some(BatchFailure {
                        batch: index,
                        chunk_ids: ids,
                        message,
                    }),
                })
            }
        }
    }
}

/// Group candidates greedily under `budget` tokens per batch.
/// A candidate larger than the budget gets a batch of its own.
fn plan_batches<'a>(candidates: &[&'a Chunk], budget: usize) -> Vec<Vec<&'a Chunk>> {
    let mut batches = Vec::new();
    let mut current: Vec<&Chunk> = Vec::new();
    let mut tokens = 0usize;

    for chunk in candidates {
        if !current.is_empty() && tokens + chunk.token_estimate > budget {
            batches.push(std::mem::take(&mut current));
            tokens = 0;
        }
        tokens += chunk.token_estimate;
        current.push(chunk);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// One verdict per batch id: the first verdict the model gave for it, or an
/// omitted verdict. Ids outside the batch are ignored.
fn reduce_verdicts(batch_ids: &[ChunkId], response: FilterResponse) -> Vec<FilterVerdict> {
    let mut by_id: HashMap<ChunkId, RawVerdict> = HashMap::new();
    for verdict in response.verdicts {
        if !batch_ids.contains(&verdict.chunk_id) {
            debug!(chunk_id = verdict.chunk_id, "Ignoring verdict for a chunk outside the batch");
            continue;
        }
        by_id.entry(verdict.chunk_id).or_insert(verdict);
    }

    batch_ids
        .iter()
        .map(|id| match by_id.remove(id) {
            Some(raw) => {
                let relevance = raw
                    .relevance
                    .unwrap_or(if raw.is_relevant { 1.0 } else { 0.0 });
                FilterVerdict::new(*id, raw.is_relevant, relevance, raw.reasoning)
            }
            None => {
                debug!(chunk_id = id, "No verdict returned, treating as not relevant");
                FilterVerdict::omitted(*id)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{keyword_verdicts, ScriptedCompletion};
    use docnav_common::errors::CompletionError;
    use docnav_common::models::{CharRange, Segment};

    fn tree_of(texts: &[&str]) -> ChunkTree {
        let mut tree = ChunkTree::new();
        let mut start = 0;
        let segments = texts
            .iter()
            .map(|t| {
                let len = t.chars().count();
                let seg = Segment {
                    char_range: CharRange::new(start, start + len),
                    text: t.to_string(),
                    token_estimate: len,
                    oversized: false,
                };
                start += len;
                seg
            })
            .collect();
        tree.insert_segments(0, None, segments);
        tree
    }

    fn filter_with(service: Arc<ScriptedCompletion>, budget: usize) -> RelevanceFilter {
        RelevanceFilter::new(service, budget, 2)
    }

    #[tokio::test]
    async fn test_omitted_chunk_is_not_relevant() {
        let tree = tree_of(&["付款条款。", "保密条款。"]);
        let service = Arc::new(ScriptedCompletion::new(vec![Ok(r#"{
            "scratchpad": "only chunk 0 matters",
            "verdicts": [{"chunk_id": 0, "is_relevant": true, "relevance": 0.9, "reasoning": "payment"}]
        }"#
        .to_string())]));
        let candidates: Vec<&Chunk> = tree.iter().collect();

        let outcome = filter_with(service.clone(), 1000)
            .filter("付款？", &candidates, &tree, FilterMode::Coarse, &[])
            .await
            .unwrap();

        assert_eq!(outcome.selected.ids(), &[0]);
        assert_eq!(outcome.verdicts.len(), 2);
        assert!(!outcome.verdicts[1].is_relevant);
        assert!(!outcome.verdicts[1].parse_failure);
        assert_eq!(outcome.notes[0].scratchpad, "only chunk 0 matters");
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_batch_fails_closed() {
        let tree = tree_of(&["a。", "b。"]);
        let service = Arc::new(ScriptedCompletion::new(vec![
            Ok("sorry, I can't".to_string()),
            Err(CompletionError::Timeout { timeout_ms: 5 }),
        ]));
        let candidates: Vec<&Chunk> = tree.iter().collect();

        let outcome = filter_with(service.clone(), 1000)
            .filter("q", &candidates, &tree, FilterMode::Coarse, &[])
            .await
            .unwrap();

        assert!(outcome.selected.is_empty());
        assert!(outcome.verdicts.iter().all(|v| v.parse_failure && !v.is_relevant));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].chunk_ids, vec![0, 1]);
        assert!(outcome.notes.is_empty());
        assert_eq!(service.call_count(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_aborts() {
        let tree = tree_of(&["a。"]);
        let service = Arc::new(ScriptedCompletion::new(vec![
            Err(CompletionError::Transport { message: "refused".into() }),
            Err(CompletionError::Upstream { status: 503, body: "down".into() }),
        ]));
        let candidates: Vec<&Chunk> = tree.iter().collect();

        let err = filter_with(service, 1000)
            .filter("q", &candidates, &tree, FilterMode::Coarse, &[])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Completion { .. }));
    }

    #[tokio::test]
    async fn test_foreign_and_duplicate_ids_are_ignored() {
        let tree = tree_of(&["a。", "b。"]);
        let service = Arc::new(ScriptedCompletion::new(vec![Ok(r#"{
            "verdicts": [
                {"chunk_id": "1", "is_relevant": false, "reasoning": "first"},
                {"chunk_id": 1, "is_relevant": true, "reasoning": "second"},
                {"chunk_id": 99, "is_relevant": true, "reasoning": "made up"}
            ]
        }"#
        .to_string())]));
        let candidates: Vec<&Chunk> = tree.iter().collect();

        let outcome = filter_with(service, 1000)
            .filter("q", &candidates, &tree, FilterMode::Fine, &[])
            .await
            .unwrap();

        assert!(outcome.selected.is_empty());
        assert_eq!(outcome.verdicts[1].reasoning, "first");
        assert_eq!(outcome.verdicts[1].relevance, 0.0);
    }

    #[tokio::test]
    async fn test_batches_are_merged_in_candidate_order() {
        let tree = tree_of(&["违约金条款。", "送达地址。", "违约责任。", "争议解决。"]);
        let service = Arc::new(ScriptedCompletion::responder(|req| Ok(keyword_verdicts(&req.prompt, "违约"))));
        let candidates: Vec<&Chunk> = tree.iter().collect();

        // each chunk is 5-6 tokens, so a budget of 6 gives one chunk per batch
        let outcome = filter_with(service.clone(), 6)
            .filter("违约怎么处理？", &candidates, &tree, FilterMode::Coarse, &[])
            .await
            .unwrap();

        assert_eq!(service.call_count(), 4);
        assert_eq!(outcome.selected.ids(), &[0, 2]);
        let order: Vec<ChunkId> = outcome.verdicts.iter().map(|v| v.chunk_id).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(outcome.notes.len(), 4);
    }

    #[tokio::test]
    async fn test_fine_pass_sees_prior_notes() {
        let tree = tree_of(&["a。"]);
        let service = Arc::new(ScriptedCompletion::responder(|req| Ok(keyword_verdicts(&req.prompt, "a"))));
        let candidates: Vec<&Chunk> = tree.iter().collect();
        let prior = vec![BatchNote {
            batch: 0,
            chunk_ids: vec![0],
            scratchpad: "the answer is near the start".to_string(),
        }];

        filter_with(service.clone(), 100)
            .filter("q", &candidates, &tree, FilterMode::Fine, &prior)
            .await
            .unwrap();

        let calls = service.calls();
        assert!(calls[0].prompt.contains("the answer is near the start"));
        assert!(calls[0].system.as_deref().unwrap_or_default().contains("sub-chunk"));
    }

    #[tokio::test]
    async fn test_no_candidates_no_call() {
        let tree = ChunkTree::new();
        let service = Arc::new(ScriptedCompletion::new(vec![]));
        let outcome = filter_with(service.clone(), 100)
            .filter("q", &[], &tree, FilterMode::Coarse, &[])
            .await
            .unwrap();
        assert!(outcome.selected.is_empty());
        assert_eq!(service.call_count(), 0);
    }

    #[test]
    fn test_oversized_candidate_gets_own_batch() {
        let tree = tree_of(&["一二三四五六七八九十。", "甲。", "乙。"]);
        let candidates: Vec<&Chunk> = tree.iter().collect();
        let batches = plan_batches(&candidates, 4);
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![1, 2]);
    }
}
