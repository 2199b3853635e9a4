//! LLM importance classifier.
//!
//! Flow:
//! 1. Ask the model to rate the email High, Medium, or Low
//! 2. Only for High, ask a second time for a one-sentence summary
//!
//! The summary is what gets read aloud on the voice call.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::mail::NormalizedMessage;
use crate::triage::types::{Assessment, Category, Classifier, Importance, Verdict};

/// Body characters sent to the model; longer bodies are cut.
const BODY_CHAR_BUDGET: usize = 4000;

/// Max tokens for the rating call.
const ANALYSIS_MAX_TOKENS: u32 = 300;

/// Max tokens for the summary call (one sentence).
const SUMMARY_MAX_TOKENS: u32 = 120;

/// Near-deterministic rating.
const ANALYSIS_TEMPERATURE: f32 = 0.1;

/// A little freedom for the spoken summary.
const SUMMARY_TEMPERATURE: f32 = 0.3;

const CATEGORIES: &[Category] = &[Category::High, Category::Medium, Category::Low];

/// Classifies email importance with a language model.
pub struct ImportanceClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl ImportanceClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Rate one email and, when it is High, summarize it.
    ///
    /// Errors from either model call are returned unchanged.
    pub async fn analyze(&self, subject: &str, body: &str) -> Result<Assessment, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(analysis_system_prompt()),
            ChatMessage::user(analysis_user_prompt(subject, body)),
        ])
        .with_temperature(ANALYSIS_TEMPERATURE)
        .with_max_tokens(ANALYSIS_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        let importance = parse_importance(&response.content);
        debug!(
            importance = ?importance,
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Importance rating received"
        );

        if importance != Importance::High {
            return Ok(Assessment {
                importance,
                summary: String::new(),
            });
        }

        let summary = self.summarize(subject, body).await?;
        info!(subject = %subject, "High importance email summarized");

        Ok(Assessment {
            importance,
            summary,
        })
    }

    async fn summarize(&self, subject: &str, body: &str) -> Result<String, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(summary_system_prompt()),
            ChatMessage::user(summary_user_prompt(subject, body)),
        ])
        .with_temperature(SUMMARY_TEMPERATURE)
        .with_max_tokens(SUMMARY_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        debug!(
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Summary received"
        );
        let summary = response.content.trim();

        if summary.is_empty() {
            Ok(format!("Important email: {subject}"))
        } else {
            Ok(summary.to_string())
        }
    }
}

#[async_trait]
impl Classifier for ImportanceClassifier {
    fn name(&self) -> &'static str {
        "importance"
    }

    fn categories(&self) -> &'static [Category] {
        CATEGORIES
    }

    async fn classify(&self, message: &NormalizedMessage) -> Result<Verdict, LlmError> {
        self.analyze(&message.subject, &message.body)
            .await
            .map(Verdict::Importance)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn analysis_system_prompt() -> &'static str {
    "You are an email importance analyst. You read one email and judge how \
     urgently its recipient needs to see it, rating its severity as High, \
     Medium or Low."
}

fn analysis_user_prompt(subject: &str, body: &str) -> String {
    format!(
        "Analyze the following email:\n\nSubject: {subject}\n\nBody: {}\n\n\
         Is this email important? Provide a brief summary and classify its \
         importance as 'High', 'Medium', or 'Low'.",
        truncate_body(body)
    )
}

fn summary_system_prompt() -> &'static str {
    "You are a concise summarizer of emails. Your summaries are read aloud \
     over the phone, so reply with exactly one plain sentence."
}

fn summary_user_prompt(subject: &str, body: &str) -> String {
    format!(
        "Summarize this email in one sentence:\n\nSubject: {subject}\n\nBody: {}",
        truncate_body(body)
    )
}

fn truncate_body(body: &str) -> String {
    body.chars().take(BODY_CHAR_BUDGET).collect()
}

// ── Response parsing ────────────────────────────────────────────────

/// Map free-form model output to an importance level.
///
/// Case-sensitive substring match; "High" is checked before "Medium",
/// anything else is Low.
fn parse_importance(text: &str) -> Importance {
    if text.contains("High") {
        Importance::High
    } else if text.contains("Medium") {
        Importance::Medium
    } else {
        Importance::Low
    }
}
