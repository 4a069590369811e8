//! LLM access for generated replies.
//!
//! rig-core carries the HTTP transport for each backend. Callers depend on
//! [`TextGenerator`] only, so tests swap in a scripted generator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use secrecy::{ExposeSecret, SecretString};

use crate::config::secs_var;
use crate::error::{ConfigError, LlmError};

/// Completion budget per request.
pub const MAX_TOKENS: u64 = 512;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }

    fn key_var(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-5-haiku-latest",
            Self::OpenAi => "gpt-4o-mini",
        }
    }
}

/// Configuration for the reply generator.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
    /// Upper bound on one completion; slower replies fall back to the
    /// acknowledgement.
    pub timeout: Duration,
    /// JSON business profile the generator is primed with.
    pub profile_path: PathBuf,
}

impl LlmConfig {
    /// Build from `LLM_BACKEND`, the backend's API key variable, `LLM_MODEL`,
    /// `LLM_TIMEOUT_SECS` and `BUSINESS_PROFILE_PATH`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match std::env::var("LLM_BACKEND") {
            Ok(raw) => LlmBackend::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "LLM_BACKEND".to_string(),
                message: format!("unknown backend '{raw}', expected anthropic or openai"),
            })?,
            Err(_) => LlmBackend::Anthropic,
        };

        let api_key = std::env::var(backend.key_var())
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingEnvVar(backend.key_var().to_string()))?;

        let model = std::env::var("LLM_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| backend.default_model().to_string());

        let timeout = secs_var(
            "LLM_TIMEOUT_SECS",
            std::env::var("LLM_TIMEOUT_SECS").ok(),
            Duration::from_secs(60),
        )?;

        let profile_path = std::env::var("BUSINESS_PROFILE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./bin/business.json"));

        Ok(Self {
            backend,
            api_key,
            model,
            timeout,
            profile_path,
        })
    }
}

/// One-shot text completion.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Complete `prompt` with `system` as the preamble.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}

enum RigClient {
    Anthropic(rig::client::Client<rig::providers::anthropic::client::AnthropicExt>),
    OpenAi(rig::client::Client<rig::providers::openai::client::OpenAIResponsesExt>),
}

/// [`TextGenerator`] over a rig-core provider client. Each call builds a
/// short-lived agent carrying the preamble.
pub struct RigGenerator {
    client: RigClient,
    model: String,
}

impl RigGenerator {
    fn provider(&self) -> &'static str {
        match self.client {
            RigClient::Anthropic(_) => LlmBackend::Anthropic.name(),
            RigClient::OpenAi(_) => LlmBackend::OpenAi.name(),
        }
    }
}

#[async_trait]
impl TextGenerator for RigGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let response = match &self.client {
            RigClient::Anthropic(client) => {
                let agent = client
                    .agent(self.model.as_str())
                    .preamble(system)
                    .max_tokens(MAX_TOKENS)
                    .build();
                agent.prompt(prompt.to_string()).await
            }
            RigClient::OpenAi(client) => {
                let agent = client
                    .agent(self.model.as_str())
                    .preamble(system)
                    .max_tokens(MAX_TOKENS)
                    .build();
                agent.prompt(prompt.to_string()).await
            }
        };

        response.map_err(|e| LlmError::RequestFailed {
            provider: self.provider().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Create a generator from configuration.
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, LlmError> {
    let client = match config.backend {
        LlmBackend::Anthropic => {
            use rig::providers::anthropic;

            let client: rig::client::Client<anthropic::client::AnthropicExt> =
                anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
                    LlmError::RequestFailed {
                        provider: "anthropic".to_string(),
                        reason: format!("Failed to create Anthropic client: {}", e),
                    }
                })?;
            RigClient::Anthropic(client)
        }
        LlmBackend::OpenAi => {
            use rig::providers::openai;

            let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
                openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
                    LlmError::RequestFailed {
                        provider: "openai".to_string(),
                        reason: format!("Failed to create OpenAI client: {}", e),
                    }
                })?;
            RigClient::OpenAi(client)
        }
    };

    tracing::info!(backend = config.backend.name(), model = %config.model, "Reply generator ready");
    Ok(Arc::new(RigGenerator {
        client,
        model: config.model.clone(),
    }))
}
