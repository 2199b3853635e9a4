//! Twilio REST notifier: places voice calls and sends SMS.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{Lookup, env_lookup};
use crate::error::{ConfigError, NotifyError};
use crate::notify::{DeliveryReceipt, Notification, Notifier};

/// Public Twilio API root.
pub const DEFAULT_BASE_URL: &str = "https://api.twilio.com";

/// Voice used for spoken summaries.
const SAY_VOICE: &str = "alice";

const REQUIRED_VARS: [&str; 4] = [
    "TWILIO_ACCOUNT_SID",
    "TWILIO_AUTH_TOKEN",
    "TWILIO_FROM_NUMBER",
    "TWILIO_TO_NUMBER",
];

/// Twilio account and routing configuration.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Twilio number notifications are sent from.
    pub from_number: String,
    /// The user's phone.
    pub to_number: String,
    pub base_url: String,
}

impl TwilioConfig {
    /// Load from environment variables.
    ///
    /// Returns `Ok(None)` when none of the Twilio variables are set, and an
    /// error when only some of them are.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Option<Self>, ConfigError> {
        match REQUIRED_VARS.map(|key| lookup(key)) {
            [None, None, None, None] => Ok(None),
            [Some(account_sid), Some(auth_token), Some(from_number), Some(to_number)] => {
                Ok(Some(Self {
                    account_sid,
                    auth_token: SecretString::from(auth_token),
                    from_number,
                    to_number,
                    base_url: DEFAULT_BASE_URL.to_string(),
                }))
            }
            partial => {
                let missing = partial.iter().position(Option::is_none).unwrap_or(0);
                Err(ConfigError::MissingRequired {
                    key: REQUIRED_VARS[missing].to_string(),
                    hint: "Set all of TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN, TWILIO_FROM_NUMBER \
                           and TWILIO_TO_NUMBER, or none of them for a dry run."
                        .to_string(),
                })
            }
        }
    }
}

/// Notifier backed by the Twilio REST API.
pub struct TwilioNotifier {
    config: TwilioConfig,
    client: reqwest::Client,
}

impl TwilioNotifier {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn resource_url(&self, resource: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{resource}.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

/// Twilio's reply for a created Call or Message resource.
#[derive(Debug, Deserialize)]
struct TwilioResource {
    sid: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl Notifier for TwilioNotifier {
    fn name(&self) -> &str {
        "twilio"
    }

    async fn send(&self, notification: &Notification) -> Result<DeliveryReceipt, NotifyError> {
        let (resource, fields) = form_fields(&self.config, notification);
        let url = self.resource_url(resource);
        debug!(url = %url, kind = notification.label(), "Sending Twilio request");

        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.config.account_sid,
                Some(self.config.auth_token.expose_secret()),
            )
            .form(&fields)
            .send()
            .await
            .map_err(|e| NotifyError::RequestFailed {
                provider: "twilio".into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                provider: "twilio".into(),
                status: status.as_u16(),
                body,
            });
        }

        let created: TwilioResource =
            response.json().await.map_err(|e| NotifyError::InvalidResponse {
                provider: "twilio".into(),
                reason: format!("Failed to parse response: {e}"),
            })?;

        info!(
            sid = %created.sid,
            status = %created.status,
            kind = notification.label(),
            "Twilio accepted notification"
        );

        Ok(DeliveryReceipt {
            sid: created.sid,
            status: created.status,
        })
    }
}

/// Resource name and form body for a notification.
fn form_fields(
    config: &TwilioConfig,
    notification: &Notification,
) -> (&'static str, Vec<(&'static str, String)>) {
    let mut fields = vec![
        ("To", config.to_number.clone()),
        ("From", config.from_number.clone()),
    ];
    match notification {
        Notification::VoiceCall { spoken_text } => {
            fields.push(("Twiml", twiml(spoken_text)));
            ("Calls", fields)
        }
        Notification::TextMessage { body } => {
            fields.push(("Body", body.clone()));
            ("Messages", fields)
        }
    }
}

/// TwiML document that reads `text` aloud.
pub fn twiml(text: &str) -> String {
    format!(
        "<Response><Say voice=\"{SAY_VOICE}\">{}</Say></Response>",
        escape_xml(text)
    )
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
