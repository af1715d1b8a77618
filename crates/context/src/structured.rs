//! Structured completion calls with a single strict retry

use docnav_common::errors::CompletionError;
use docnav_common::llm::{parse_structured, CompletionRequest, CompletionService};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

/// Request a JSON response and decode it into `T`.
///
/// The first attempt uses `request` as is. When it fails for any reason
/// (timeout, transport, undecodable or invalid output) the call is repeated
/// once with `retry_instruction` appended to the prompt. The second error,
/// if any, is returned to the caller, which decides whether it degrades or
/// aborts.
pub(crate) async fn request_structured<T, V>(
    service: &dyn CompletionService,
    request: CompletionRequest,
    retry_instruction: &str,
    validate: V,
) -> Result<T, CompletionError>
where
    T: DeserializeOwned,
    V: Fn(&T) -> Result<(), String>,
{
    match attempt(service, request.clone(), &validate).await {
        Ok(value) => Ok(value),
        Err(first) => {
            warn!(
                model = service.model_name(),
                error = %first,
                "Structured completion failed, retrying once"
            );
            let mut retry = request;
            retry.prompt = format!("{}\n\n{}", retry.prompt, retry_instruction);
            let result = attempt(service, retry, &validate).await;
            if result.is_ok() {
                debug!(model = service.model_name(), "Retry produced usable output");
            }
            result
        }
    }
}

async fn attempt<T, V>(
    service: &dyn CompletionService,
    request: CompletionRequest,
    validate: &V,
) -> Result<T, CompletionError>
where
    T: DeserializeOwned,
    V: Fn(&T) -> Result<(), String>,
{
    let raw = service.complete(request).await?;
    let value: T = parse_structured(&raw)?;
    validate(&value).map_err(CompletionError::malformed)?;
    Ok(value)
}

/// Accept ids the model wrote as numbers or as numeric strings
pub(crate) fn lenient_id<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| D::Error::custom(format!("invalid id {}", n))),
        serde_json::Value::String(s) => s
            .trim()
            .trim_start_matches('#')
            .parse::<usize>()
            .map_err(|_| D::Error::custom(format!("invalid id {:?}", s))),
        other => Err(D::Error::custom(format!("invalid id {}", other))),
    }
}

/// List form of [`lenient_id`]
pub(crate) fn lenient_ids<'de, D>(deserializer: D) -> Result<Vec<usize>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Id(#[serde(deserialize_with = "lenient_id")] usize);

    let ids: Option<Vec<Id>> = Option::deserialize(deserializer)?;
    Ok(ids.unwrap_or_default().into_iter().map(|Id(id)| id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedCompletion;

    #[derive(Debug, Deserialize)]
    struct Reply {
        #[serde(deserialize_with = "lenient_id")]
        id: usize,
        #[serde(default, deserialize_with = "lenient_ids")]
        refs: Vec<usize>,
    }

    #[tokio::test]
    async fn test_retry_once_then_succeed() {
        let service = ScriptedCompletion::new(vec![
            Ok("not json at all".to_string()),
            Ok(r#"{"id": "7", "refs": [1, "2"]}"#.to_string()),
        ]);

        let reply: Reply = request_structured(&service, CompletionRequest::new("p"), "STRICT", |_| Ok(()))
            .await
            .unwrap();

        assert_eq!(reply.id, 7);
        assert_eq!(reply.refs, vec![1, 2]);
        let calls = service.calls();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].prompt.contains("STRICT"));
        assert!(calls[1].prompt.ends_with("STRICT"));
    }

    #[tokio::test]
    async fn test_second_failure_is_returned() {
        let service = ScriptedCompletion::new(vec![
            Err(CompletionError::Timeout { timeout_ms: 10 }),
            Ok("{}".to_string()),
            Ok("never requested".to_string()),
        ]);

        let err = request_structured::<Reply, _>(&service, CompletionRequest::new("p"), "STRICT", |_| Ok(()))
            .await
            .unwrap_err();

        assert!(matches!(err, CompletionError::MalformedOutput { .. }));
        assert_eq!(service.call_count(), 2);
    }

    #[tokio::test]
    async fn test_validation_failure_triggers_retry() {
        let service = ScriptedCompletion::new(vec![
            Ok(r#"{"id": 0}"#.to_string()),
            Ok(r#"{"id": 3}"#.to_string()),
        ]);

        let reply: Reply = request_structured(&service, CompletionRequest::new("p"), "STRICT", |r: &Reply| {
            if r.id == 0 {
                Err("id must be positive".to_string())
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(reply.id, 3);
        assert!(reply.refs.is_empty());
    }
}
