//! Advisory answer verification
//!
//! An independent judgement of whether the answer is supported by the
//! fragments it was synthesized from. The verdict is recorded and shown but
//! never changes the answer. Unusable verifier output degrades to a negative
//! verdict; transport failures abort.

use crate::prompts;
use crate::structured::request_structured;
use docnav_common::errors::{AppError, Result};
use docnav_common::llm::{CompletionRequest, CompletionService};
use docnav_common::models::{Answer, Chunk, VerificationResult};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    is_correct: bool,

    #[serde(default)]
    reasoning: String,
}

pub struct Verifier {
    service: Arc<dyn CompletionService>,
}

impl Verifier {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }

    #[instrument(skip_all, fields(fragments = fragments.len()))]
    pub async fn verify(
        &self,
        question: &str,
        answer: &Answer,
        fragments: &[&Chunk],
    ) -> Result<VerificationResult> {
        if fragments.is_empty() {
            return Ok(VerificationResult {
                is_correct: false,
                reasoning: "no document fragments were available to check the answer against".to_string(),
            });
        }

        let request = CompletionRequest::new(prompts::verify_prompt(question, &answer.text, fragments))
            .with_system(prompts::verify_system())
            .with_schema(prompts::verify_schema());

        match request_structured::<VerifyResponse, _>(
            self.service.as_ref(),
            request,
            prompts::STRICT_JSON_RETRY,
            |_| Ok(()),
        )
        .await
        {
            Ok(response) => {
                info!(is_correct = response.is_correct, "Answer verified");
                Ok(VerificationResult {
                    is_correct: response.is_correct,
                    reasoning: response.reasoning,
                })
            }
            Err(err) if err.is_transport() => Err(AppError::completion("verification", err)),
            Err(err) => {
                warn!(error = %err, "Verifier output unusable, recording a negative verdict");
                Ok(VerificationResult {
                    is_correct: false,
                    reasoning: format!("verification unavailable: {}", err),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedCompletion;
    use docnav_common::errors::CompletionError;
    use docnav_common::models::CharRange;

    fn answer() -> Answer {
        Answer {
            text: "三十日内付款 [#0]".to_string(),
            cited_fragment_ids: vec![0],
        }
    }

    fn fragment() -> Chunk {
        Chunk {
            id: 0,
            depth: 0,
            parent_id: None,
            text: "甲方应于收货后三十日内付款。".to_string(),
            char_range: CharRange::new(0, 14),
            token_estimate: 14,
            oversized: false,
        }
    }

    #[tokio::test]
    async fn test_verdict_is_passed_through() {
        let service = Arc::new(ScriptedCompletion::new(vec![Ok(
            r#"{"is_correct": true, "reasoning": "fragment 0 states the deadline"}"#.to_string(),
        )]));
        let chunk = fragment();

        let result = Verifier::new(service.clone())
            .verify("付款期限？", &answer(), &[&chunk])
            .await
            .unwrap();

        assert!(result.is_correct);
        assert_eq!(result.reasoning, "fragment 0 states the deadline");
        let call = &service.calls()[0];
        assert!(call.prompt.contains("三十日内付款 [#0]"));
        assert!(call.prompt.contains("<fragment id=\"0\">"));
    }

    #[tokio::test]
    async fn test_malformed_output_degrades_to_negative() {
        let service = Arc::new(ScriptedCompletion::new(vec![
            Ok("yes".to_string()),
            Err(CompletionError::Timeout { timeout_ms: 100 }),
        ]));
        let chunk = fragment();

        let result = Verifier::new(service).verify("q", &answer(), &[&chunk]).await.unwrap();

        assert!(!result.is_correct);
        assert!(result.reasoning.starts_with("verification unavailable"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_error() {
        let service = Arc::new(ScriptedCompletion::new(vec![]));
        let chunk = fragment();

        let err = Verifier::new(service).verify("q", &answer(), &[&chunk]).await.unwrap_err();
        assert!(matches!(err, AppError::Completion { .. }));
    }

    #[tokio::test]
    async fn test_no_fragments_no_call() {
        let service = Arc::new(ScriptedCompletion::new(vec![]));
        let result = Verifier::new(service.clone()).verify("q", &answer(), &[]).await.unwrap();
        assert!(!result.is_correct);
        assert_eq!(service.call_count(), 0);
    }
}
