//! OpenAI-compatible chat completion backend

use super::{CompletionRequest, CompletionService};
use crate::config::ModelEndpointConfig;
use crate::errors::{AppError, CompletionError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Chat completion client for any endpoint speaking the OpenAI wire format
pub struct OpenAiCompatibleClient {
    /// Role this client serves, used as a metrics label
    role: &'static str,
    config: ModelEndpointConfig,
    client: reqwest::Client,
}

impl OpenAiCompatibleClient {
    /// Create a new client serving `role` (router, reasoning or verification)
    pub fn new(role: &'static str, config: ModelEndpointConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { role, config, client })
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn response_format(&self, request: &CompletionRequest) -> Option<serde_json::Value> {
        let schema = request.schema.as_ref()?;
        if self.config.structured_output {
            Some(serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": false,
                }
            }))
        } else {
            Some(serde_json::json!({ "type": "json_object" }))
        }
    }

    async fn send(&self, request: &CompletionRequest) -> std::result::Result<String, CompletionError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage { role: "system", content: system });
        }
        messages.push(ChatMessage { role: "user", content: &request.prompt });

        let body = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            response_format: self.response_format(request),
        };

        let mut http = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(|e| self.map_transport(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Upstream { status, body });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.timeout_error()
            } else {
                CompletionError::malformed(format!("Failed to parse completion envelope: {}", e))
            }
        })?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| CompletionError::malformed("Empty response from model"))
    }

    fn map_transport(&self, e: reqwest::Error) -> CompletionError {
        if e.is_timeout() {
            self.timeout_error()
        } else {
            CompletionError::Transport {
                message: format!("Completion request failed: {}", e),
            }
        }
    }

    fn timeout_error(&self) -> CompletionError {
        CompletionError::Timeout {
            timeout_ms: self.config.timeout_secs.saturating_mul(1000),
        }
    }
}

#[async_trait]
impl CompletionService for OpenAiCompatibleClient {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<String, CompletionError> {
        let start = Instant::now();

        let result = match tokio::time::timeout(self.config.timeout(), self.send(&request)).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error()),
        };

        metrics::record_model_call(
            self.role,
            &self.config.model,
            start.elapsed().as_secs_f64(),
            result.as_ref().err(),
        );

        if let Err(e) = &result {
            tracing::warn!(role = self.role, model = %self.config.model, error = %e, "Completion call failed");
        }
        result
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
