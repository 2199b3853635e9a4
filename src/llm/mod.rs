//! LLM integration.
//!
//! Supports:
//! - **OpenAI**: completions and embeddings via rig-core
//! - **Anthropic**: completions via rig-core
//!
//! rig-core handles HTTP transport; `RigAdapter` and `RigEmbedder` bridge
//! rig's model traits to our `LlmProvider` and `Embedder` traits.

pub mod embedding;
pub mod provider;
mod rig_adapter;

pub use embedding::{Embedder, cosine_similarity, similarity_matrix};
pub use provider::*;
pub use rig_adapter::{RigAdapter, RigEmbedder};

use std::str::FromStr;
use std::sync::Arc;

use rig::client::{CompletionClient, EmbeddingsClient};
use secrecy::{ExposeSecret, SecretString};

use crate::config::{Lookup, env_lookup, require_var};
use crate::error::{ConfigError, LlmError};

/// Default completion model.
pub const DEFAULT_MODEL: &str = "gpt-4";

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(format!("unknown LLM backend '{other}' (expected openai|anthropic)")),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let backend = crate::config::parse_var(lookup, "TRIAGE_LLM_BACKEND", LlmBackend::OpenAi)?;
        let key_var = match backend {
            LlmBackend::OpenAi => "OPENAI_API_KEY",
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
        };
        let api_key = SecretString::from(require_var(lookup, key_var)?);
        let model = lookup("TRIAGE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Ok(Self {
            backend,
            api_key,
            model,
        })
    }
}

/// Configuration for the embedding backend (always OpenAI).
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: SecretString,
    pub model: String,
}

impl EmbeddingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: SecretString::from(require_var(lookup, "OPENAI_API_KEY")?),
            model: lookup("TRIAGE_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_provider(config),
        LlmBackend::OpenAi => create_openai_provider(config),
    }
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model, "anthropic")))
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model, "openai")))
}

/// Create an embedding backend from configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::EmbeddingFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.embedding_model(&config.model);
    tracing::info!("Using OpenAI embeddings (model: {})", config.model);
    Ok(Arc::new(RigEmbedder::new(model, &config.model, "openai")))
}
