//! Bridges rig-core models to the crate's `LlmProvider` and `Embedder` traits.

use async_trait::async_trait;
use rig::completion::CompletionModel;
use rig::completion::message::{AssistantContent, Message};
use rig::embeddings::EmbeddingModel;

use crate::error::LlmError;
use crate::llm::embedding::Embedder;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider, Role};

/// `LlmProvider` over any rig `CompletionModel`.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M> RigAdapter<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        // rig wants the final user turn as the prompt and everything
        // before it as history.
        let mut turns: Vec<Message> = request
            .messages
            .iter()
            .filter_map(|m| match m.role {
                Role::User => Some(Message::user(m.content.clone())),
                Role::Assistant => Some(Message::assistant(m.content.clone())),
                Role::System => None,
            })
            .collect();
        let prompt = turns.pop().ok_or_else(|| LlmError::RequestFailed {
            provider: self.provider.to_string(),
            reason: "completion request has no user message".into(),
        })?;

        let mut builder = self.model.completion_request(prompt);
        if let Some(system) = request.system_prompt() {
            builder = builder.preamble(system);
        }
        for turn in turns {
            builder = builder.message(turn);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.provider.to_string(),
            reason: e.to_string(),
        })?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let input_tokens = u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX);
        let output_tokens = u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX);

        Ok(CompletionResponse {
            content,
            input_tokens,
            output_tokens,
        })
    }
}

/// `Embedder` over any rig `EmbeddingModel`.
pub struct RigEmbedder<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M> RigEmbedder<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
        }
    }
}

#[async_trait]
impl<M> Embedder for RigEmbedder<M>
where
    M: EmbeddingModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(M::MAX_DOCUMENTS.max(1)) {
            let embeddings = self
                .model
                .embed_texts(chunk.to_vec())
                .await
                .map_err(|e| LlmError::EmbeddingFailed {
                    provider: self.provider.to_string(),
                    reason: e.to_string(),
                })?;

            if embeddings.len() != chunk.len() {
                return Err(LlmError::InvalidResponse {
                    provider: self.provider.to_string(),
                    reason: format!(
                        "embedding count mismatch: expected {}, got {}",
                        chunk.len(),
                        embeddings.len()
                    ),
                });
            }

            #[allow(clippy::cast_possible_truncation)]
            vectors.extend(
                embeddings
                    .into_iter()
                    .map(|e| e.vec.into_iter().map(|v| v as f32).collect::<Vec<f32>>()),
            );
        }

        Ok(vectors)
    }
}
