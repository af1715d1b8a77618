//! Configuration management for DocNav
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Completion backends, one per role
    #[serde(default)]
    pub models: ModelsConfig,

    /// Recursive narrowing configuration
    #[serde(default)]
    pub navigation: NavigationConfig,

    /// Audit sink configuration
    #[serde(default)]
    pub audit: AuditConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelsConfig {
    /// Backend used by the relevance filter (coarse and fine)
    #[serde(default = "default_router_model")]
    pub router: ModelEndpointConfig,

    /// Backend used for answer synthesis and input parsing
    #[serde(default = "default_reasoning_model")]
    pub reasoning: ModelEndpointConfig,

    /// Backend used by the verifier
    #[serde(default = "default_verification_model")]
    pub verification: ModelEndpointConfig,
}

/// One OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelEndpointConfig {
    /// API base URL, without the `/chat/completions` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key (sent as a bearer token when present)
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_model_name")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-call timeout in seconds
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,

    /// Request `json_schema` response formatting instead of plain `json_object`
    #[serde(default = "default_structured_output")]
    pub structured_output: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NavigationConfig {
    /// Token budget for depth-0 chunks
    #[serde(default = "default_coarse_token_budget")]
    pub coarse_token_budget: usize,

    /// Each recursion step divides the token budget by this factor
    #[serde(default = "default_refinement_factor")]
    pub refinement_factor: usize,

    /// Fragments at or below this estimate are not split further
    #[serde(default = "default_min_granularity_tokens")]
    pub min_granularity_tokens: usize,

    /// Maximum number of fine passes
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Upper bound on candidate tokens sent in one filter call
    #[serde(default = "default_batch_token_budget")]
    pub batch_token_budget: usize,

    /// Filter batches evaluated concurrently
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    /// Treat every single line break as a paragraph break
    #[serde(default)]
    pub newline_is_paragraph: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    /// Directory receiving one markdown record per query
    #[serde(default = "default_audit_dir")]
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logging: bool,

    /// Service name attached to log lines
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_model_name() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.3 }
fn default_max_tokens() -> u32 { 2048 }
fn default_model_timeout() -> u64 { 30 }
fn default_structured_output() -> bool { true }
fn default_coarse_token_budget() -> usize { 2000 }
fn default_refinement_factor() -> usize { 4 }
fn default_min_granularity_tokens() -> usize { 200 }
fn default_max_depth() -> usize { 3 }
fn default_batch_token_budget() -> usize { 24_000 }
fn default_max_concurrent_batches() -> usize { 4 }
fn default_audit_dir() -> String { "qa_logs".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_service_name() -> String { "docnav".to_string() }

fn endpoint(temperature: f32, max_tokens: u32) -> ModelEndpointConfig {
    ModelEndpointConfig {
        base_url: default_base_url(),
        api_key: None,
        model: default_model_name(),
        temperature,
        max_tokens,
        timeout_secs: default_model_timeout(),
        structured_output: default_structured_output(),
    }
}

fn default_router_model() -> ModelEndpointConfig { endpoint(0.5, 1024) }
fn default_reasoning_model() -> ModelEndpointConfig { endpoint(0.3, 2048) }
fn default_verification_model() -> ModelEndpointConfig { endpoint(0.0, 1024) }

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            router: default_router_model(),
            reasoning: default_reasoning_model(),
            verification: default_verification_model(),
        }
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            coarse_token_budget: default_coarse_token_budget(),
            refinement_factor: default_refinement_factor(),
            min_granularity_tokens: default_min_granularity_tokens(),
            max_depth: default_max_depth(),
            batch_token_budget: default_batch_token_budget(),
            max_concurrent_batches: default_max_concurrent_batches(),
            newline_is_paragraph: false,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { dir: default_audit_dir() }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models: ModelsConfig::default(),
            navigation: NavigationConfig::default(),
            audit: AuditConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ModelEndpointConfig {
    /// Get the call timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl NavigationConfig {
    /// Token budget used to split fragments for the pass at `depth` (depth 0 = coarse)
    pub fn token_budget_at(&self, depth: usize) -> usize {
        let factor = self.refinement_factor.max(2);
        let mut budget = self.coarse_token_budget;
        for _ in 0..depth {
            budget /= factor;
        }
        budget.max(self.min_granularity_tokens.max(1))
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__MODELS__ROUTER__MODEL=qwen-plus
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject navigation settings the narrowing loop cannot honour
    pub fn validate(&self) -> Result<()> {
        let nav = &self.navigation;
        let invalid = |message: &str| -> Result<()> {
            Err(AppError::Configuration {
                message: message.to_string(),
            })
        };

        if nav.coarse_token_budget == 0 || nav.min_granularity_tokens == 0 {
            return invalid("navigation token budgets must be positive");
        }
        if nav.min_granularity_tokens >= nav.coarse_token_budget {
            return invalid("navigation.min_granularity_tokens must be below coarse_token_budget");
        }
        if nav.refinement_factor < 2 {
            return invalid("navigation.refinement_factor must be at least 2");
        }
        if nav.max_depth == 0 {
            return invalid("navigation.max_depth must be at least 1");
        }
        if nav.batch_token_budget < nav.coarse_token_budget {
            return invalid("navigation.batch_token_budget must hold at least one coarse chunk");
        }
        if nav.max_concurrent_batches == 0 {
            return invalid("navigation.max_concurrent_batches must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.navigation.max_depth, 3);
        assert_eq!(config.audit.dir, "qa_logs");
        assert_eq!(config.models.verification.temperature, 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_token_budget_shrinks_to_floor() {
        let nav = NavigationConfig::default();
        assert_eq!(nav.token_budget_at(0), 2000);
        assert_eq!(nav.token_budget_at(1), 500);
        // 2000 / 16 = 125, floored at the minimum granularity
        assert_eq!(nav.token_budget_at(2), 200);
    }

    #[test]
    fn test_validate_rejects_inverted_budgets() {
        let mut config = AppConfig::default();
        config.navigation.min_granularity_tokens = 5000;
        assert!(matches!(
            config.validate(),
            Err(AppError::Configuration { .. })
        ));
    }
}
