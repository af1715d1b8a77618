//! Answer synthesis
//!
//! Provides:
//! - Answer generation grounded in the final fragments
//! - Citation extraction from the structured id list and inline `[#id]` markers
//! - Citation soundness: ids outside the input fragments are stripped from the
//!   id list and the answer text, and logged

use crate::prompts;
use crate::structured::{lenient_ids, request_structured};
use docnav_common::errors::{AppError, Result};
use docnav_common::llm::{CompletionRequest, CompletionService};
use docnav_common::metrics;
use docnav_common::models::{Answer, Chunk, ChunkId};
use regex_lite::{Captures, Regex};
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use tracing::{info, instrument, warn};

/// Answer returned when navigation left nothing to answer from
pub const INSUFFICIENT_INFORMATION: &str =
    "The document does not contain enough information to answer this question.";

/// Synthesized answer plus the citations that had to be dropped
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer: Answer,

    /// Ids the model cited that were not among the input fragments
    pub violations: Vec<ChunkId>,
}

#[derive(Debug, Deserialize)]
struct AnswerResponse {
    answer: String,

    #[serde(default, deserialize_with = "lenient_ids")]
    cited_fragment_ids: Vec<ChunkId>,
}

fn inline_citation() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[ \t]*\[#(\d+)\]").expect("inline citation pattern is valid"))
}

/// Synthesizer over the reasoning backend
pub struct Synthesizer {
    service: Arc<dyn CompletionService>,
}

impl Synthesizer {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }

    /// Answer `question` from `fragments` only
    #[instrument(skip_all, fields(fragments = fragments.len()))]
    pub async fn synthesize(&self, question: &str, fragments: &[&Chunk]) -> Result<Synthesis> {
        if fragments.is_empty() {
            info!("No fragments to answer from");
            return Ok(Synthesis {
                answer: Answer {
                    text: INSUFFICIENT_INFORMATION.to_string(),
                    cited_fragment_ids: Vec::new(),
                },
                violations: Vec::new(),
            });
        }

        let request = CompletionRequest::new(prompts::synthesis_prompt(question, fragments))
            .with_system(prompts::synthesis_system())
            .with_schema(prompts::answer_schema());

        let response: AnswerResponse = request_structured(
            self.service.as_ref(),
            request,
            prompts::STRICT_JSON_RETRY,
            |r: &AnswerResponse| {
                if r.answer.trim().is_empty() {
                    Err("answer text is empty".to_string())
                } else {
                    Ok(())
                }
            },
        )
        .await
        .map_err(|e| {
            if e.is_transport() {
                AppError::completion("reasoning", e)
            } else {
                AppError::Synthesis {
                    message: e.to_string(),
                }
            }
        })?;

        let allowed: Vec<ChunkId> = fragments.iter().map(|c| c.id).collect();
        let cited = response
            .cited_fragment_ids
            .iter()
            .copied()
            .chain(extract_inline_citations(&response.answer));
        let (cited, violations) = sanitize_citations(cited, &allowed);

        for id in &violations {
            warn!(chunk_id = id, "Answer cited a fragment it was not given, citation dropped");
        }
        metrics::record_citation_violations(violations.len());
        info!(cited = cited.len(), violations = violations.len(), "Answer synthesized");

        Ok(Synthesis {
            answer: Answer {
                text: strip_inline_citations(&response.answer, &allowed).trim().to_string(),
                cited_fragment_ids: cited,
            },
            violations,
        })
    }
}

/// Ids referenced inline as `[#id]`, in order of appearance
fn extract_inline_citations(text: &str) -> Vec<ChunkId> {
    inline_citation()
        .captures_iter(text)
        .filter_map(|cap| cap.get(1)?.as_str().parse().ok())
        .collect()
}

/// Remove `[#id]` markers whose id is not in `allowed`
fn strip_inline_citations(text: &str, allowed: &[ChunkId]) -> String {
    inline_citation()
        .replace_all(text, |caps: &Captures| {
            let keep = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<ChunkId>().ok())
                .is_some_and(|id| allowed.contains(&id));
            match (keep, caps.get(0)) {
                (true, Some(marker)) => marker.as_str().to_string(),
                _ => String::new(),
            }
        })
        .into_owned()
}

/// Split cited ids into allowed ones (deduplicated, first-citation order)
/// and violations (deduplicated)
fn sanitize_citations(
    cited: impl IntoIterator<Item = ChunkId>,
    allowed: &[ChunkId],
) -> (Vec<ChunkId>, Vec<ChunkId>) {
    let mut kept = Vec::new();
    let mut violations = Vec::new();
    for id in cited {
        let bucket = if allowed.contains(&id) {
            &mut kept
        } else {
            &mut violations
        };
        if !bucket.contains(&id) {
            bucket.push(id);
        }
    }
    (kept, violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedCompletion;
    use docnav_common::errors::CompletionError;
    use docnav_common::models::CharRange;

    fn fragment(id: ChunkId, text: &str) -> Chunk {
        Chunk {
            id,
            depth: 1,
            parent_id: Some(0),
            text: text.to_string(),
            char_range: CharRange::new(id * 10, id * 10 + text.chars().count()),
            token_estimate: text.chars().count(),
            oversized: false,
        }
    }

    #[tokio::test]
    async fn test_empty_fragments_need_no_model_call() {
        let service = Arc::new(ScriptedCompletion::new(vec![]));
        let synthesis = Synthesizer::new(service.clone()).synthesize("q", &[]).await.unwrap();

        assert_eq!(synthesis.answer.text, INSUFFICIENT_INFORMATION);
        assert!(synthesis.answer.cited_fragment_ids.is_empty());
        assert_eq!(service.call_count(), 0);
    }

    #[tokio::test]
    async fn test_citations_outside_fragments_are_stripped() {
        let service = Arc::new(ScriptedCompletion::new(vec![Ok(r#"{
            "answer": "逾期付款按每日千分之一支付违约金 [#2]，另见 [#42]。",
            "cited_fragment_ids": [2, 99, 2]
        }"#
        .to_string())]));
        let a = fragment(2, "逾期付款的，每日按未付金额千分之一支付违约金。");
        let b = fragment(3, "乙方应按约定时间交货。");

        let synthesis = Synthesizer::new(service)
            .synthesize("违约金怎么算？", &[&a, &b])
            .await
            .unwrap();

        assert_eq!(synthesis.answer.cited_fragment_ids, vec![2]);
        assert_eq!(synthesis.violations, vec![99, 42]);
        assert!(!synthesis.answer.text.contains("[#42]"));
        assert_eq!(synthesis.answer.text, "逾期付款按每日千分之一支付违约金 [#2]，另见。");
    }

    #[tokio::test]
    async fn test_inline_citations_fill_missing_list() {
        let service = Arc::new(ScriptedCompletion::new(vec![Ok(
            r#"{"answer": "Delivery goes to the buyer's warehouse [#3]."}"#.to_string(),
        )]));
        let a = fragment(3, "交货地点为甲方仓库。");

        let synthesis = Synthesizer::new(service).synthesize("where?", &[&a]).await.unwrap();

        assert_eq!(synthesis.answer.cited_fragment_ids, vec![3]);
        assert!(synthesis.violations.is_empty());
    }

    #[tokio::test]
    async fn test_unusable_output_is_synthesis_error() {
        let service = Arc::new(ScriptedCompletion::new(vec![
            Ok(r#"{"answer": "   "}"#.to_string()),
            Ok("still not json".to_string()),
        ]));
        let a = fragment(1, "text");

        let err = Synthesizer::new(service.clone()).synthesize("q", &[&a]).await.unwrap_err();

        assert!(matches!(err, AppError::Synthesis { .. }));
        assert_eq!(service.call_count(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_is_completion_error() {
        let service = Arc::new(ScriptedCompletion::new(vec![
            Err(CompletionError::Timeout { timeout_ms: 1 }),
            Err(CompletionError::Transport { message: "reset".into() }),
        ]));
        let a = fragment(1, "text");

        let err = Synthesizer::new(service).synthesize("q", &[&a]).await.unwrap_err();
        assert!(matches!(err, AppError::Completion { .. }));
    }

    #[test]
    fn test_strip_inline_citations_keeps_allowed_markers() {
        let text = strip_inline_citations("See [#1] and [#7][#5].", &[1, 5]);
        assert_eq!(text, "See [#1] and[#5].");
    }

    #[test]
    fn test_sanitize_keeps_first_citation_order() {
        let (kept, violations) = sanitize_citations(vec![5, 1, 5, 7, 1], &[1, 5]);
        assert_eq!(kept, vec![5, 1]);
        assert_eq!(violations, vec![7]);
    }
}
