//! Completion-service capability
//!
//! Every model interaction in DocNav goes through one capability:
//! given a prompt and an optional response schema, return the model's text
//! or fail with a `CompletionError`. Three logically distinct backends
//! (router, reasoning, verification) are injected as implementations of it.

mod openai;

pub use openai::OpenAiCompatibleClient;

use crate::config::ModelsConfig;
use crate::errors::{CompletionError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// JSON schema the response must follow
#[derive(Debug, Clone, Serialize)]
pub struct ResponseSchema {
    /// Schema name (letters, digits, underscores)
    pub name: String,

    /// JSON Schema document
    pub schema: serde_json::Value,
}

impl ResponseSchema {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// One completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System instructions
    pub system: Option<String>,

    /// User prompt
    pub prompt: String,

    /// Structured-output schema, if the caller expects JSON
    pub schema: Option<ResponseSchema>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            schema: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_schema(mut self, schema: ResponseSchema) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// Trait for completion backends
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Run one completion and return the raw model text
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<String, CompletionError>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// The three backends a query engine needs
#[derive(Clone)]
pub struct CompletionBackends {
    /// Relevance filtering, coarse and fine
    pub router: Arc<dyn CompletionService>,

    /// Answer synthesis and input parsing
    pub reasoning: Arc<dyn CompletionService>,

    /// Answer verification
    pub verification: Arc<dyn CompletionService>,
}

impl CompletionBackends {
    /// Build OpenAI-compatible clients for every role from configuration
    pub fn from_config(models: &ModelsConfig) -> Result<Self> {
        Ok(Self {
            router: Arc::new(OpenAiCompatibleClient::new("router", models.router.clone())?),
            reasoning: Arc::new(OpenAiCompatibleClient::new("reasoning", models.reasoning.clone())?),
            verification: Arc::new(OpenAiCompatibleClient::new("verification", models.verification.clone())?),
        })
    }

    /// Use one backend for every role
    pub fn uniform(service: Arc<dyn CompletionService>) -> Self {
        Self {
            router: service.clone(),
            reasoning: service.clone(),
            verification: service,
        }
    }
}

/// Decode a structured response from raw model text.
///
/// Tolerates markdown code fences and prose around the JSON by falling back
/// to the outermost `{ ... }` span.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> std::result::Result<T, CompletionError> {
    let trimmed = strip_code_fence(raw.trim());

    match serde_json::from_str::<T>(trimmed) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            let span = match (trimmed.find('{'), trimmed.rfind('}')) {
                (Some(start), Some(end)) if start < end => &trimmed[start..=end],
                _ => {
                    return Err(CompletionError::malformed(format!(
                        "no JSON object in model output: {}",
                        first_err
                    )))
                }
            };
            serde_json::from_str::<T>(span).map_err(|e| {
                CompletionError::malformed(format!("invalid structured output: {}", e))
            })
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (e.g. `json`) on the opening fence line
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Flag {
        ok: bool,
    }

    #[test]
    fn test_parse_plain_json() {
        let flag: Flag = parse_structured(r#"{"ok": true}"#).unwrap();
        assert!(flag.ok);
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"ok\": false}\n```";
        let flag: Flag = parse_structured(raw).unwrap();
        assert!(!flag.ok);
    }

    #[test]
    fn test_parse_json_wrapped_in_prose() {
        let raw = "Here is my verdict: {\"ok\": true} hope this helps";
        let flag: Flag = parse_structured(raw).unwrap();
        assert!(flag.ok);
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        let err = parse_structured::<Flag>("I cannot answer that").unwrap_err();
        assert!(matches!(err, CompletionError::MalformedOutput { .. }));
    }
}
