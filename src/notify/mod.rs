//! Notification delivery (voice calls and text messages).
//!
//! The triage loop hands a `Notification` to whichever `Notifier` was
//! wired at startup. Recipient and sender numbers belong to the
//! notifier's configuration, not to the notification.

pub mod twilio;

pub use twilio::{TwilioConfig, TwilioNotifier};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::NotifyError;

/// What to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Phone call that reads `spoken_text` aloud.
    VoiceCall { spoken_text: String },
    /// SMS with a plain-text body.
    TextMessage { body: String },
}

impl Notification {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::VoiceCall { .. } => "voice_call",
            Self::TextMessage { .. } => "text_message",
        }
    }
}

/// Provider acknowledgement of an accepted notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub sid: String,
    pub status: String,
}

/// Delivers notifications to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Provider name, for logging.
    fn name(&self) -> &str;

    /// Deliver one notification. Delivery is attempted once.
    async fn send(&self, notification: &Notification) -> Result<DeliveryReceipt, NotifyError>;
}

/// Body of the SMS sent for a keyword match.
pub fn sms_body(subject: &str, matched_keywords: &[String]) -> String {
    format!(
        "Important email: {}\nMatched keywords: {}",
        subject,
        matched_keywords.join(", ")
    )
}

/// Dry-run notifier: logs instead of delivering.
///
/// Used when no Twilio credentials are configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<DeliveryReceipt, NotifyError> {
        match notification {
            Notification::VoiceCall { spoken_text } => {
                info!(text = %spoken_text, "[dry run] Would place voice call");
            }
            Notification::TextMessage { body } => {
                info!(body = %body, "[dry run] Would send text message");
            }
        }
        Ok(DeliveryReceipt {
            sid: format!("dry-run-{}", uuid::Uuid::new_v4()),
            status: "logged".to_string(),
        })
    }
}
