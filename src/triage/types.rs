//! Shared types for the triage pipeline.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::mail::NormalizedMessage;
use crate::notify::{DeliveryReceipt, Notification, sms_body};

// ── Verdicts ────────────────────────────────────────────────────────

/// Importance level assigned by the LLM classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    High,
    Medium,
    Low,
}

/// LLM importance assessment. `summary` is non-empty only for `High`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub importance: Importance,
    pub summary: String,
}

/// Keyword relevance result.
///
/// `relevant_sentences[i]` is the evidence for `matched_keywords[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relevance {
    pub matched_keywords: Vec<String>,
    pub relevant_sentences: Vec<String>,
}

impl Relevance {
    pub fn is_relevant(&self) -> bool {
        !self.matched_keywords.is_empty()
    }
}

/// Outcome of classifying one message with one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Verdict {
    Importance(Assessment),
    Relevance(Relevance),
}

impl Verdict {
    /// High importance, or at least one keyword match.
    pub fn requires_notification(&self) -> bool {
        match self {
            Self::Importance(a) => a.importance == Importance::High,
            Self::Relevance(r) => r.is_relevant(),
        }
    }

    /// Counting bucket for the run summary.
    pub fn category(&self) -> Category {
        match self {
            Self::Importance(a) => match a.importance {
                Importance::High => Category::High,
                Importance::Medium => Category::Medium,
                Importance::Low => Category::Low,
            },
            Self::Relevance(r) if r.is_relevant() => Category::Matched,
            Self::Relevance(_) => Category::Unmatched,
        }
    }

    /// The notification to deliver for this verdict, if any.
    pub fn notification(&self, message: &NormalizedMessage) -> Option<Notification> {
        if !self.requires_notification() {
            return None;
        }
        Some(match self {
            Self::Importance(a) => Notification::VoiceCall {
                spoken_text: a.summary.clone(),
            },
            Self::Relevance(r) => Notification::TextMessage {
                body: sms_body(&message.subject, &r.matched_keywords),
            },
        })
    }

    /// Human-readable evidence printed before notifying.
    pub fn evidence(&self, message: &NormalizedMessage) -> Option<String> {
        if !self.requires_notification() {
            return None;
        }
        Some(match self {
            Self::Importance(a) => format!("Important email found:\n{}", a.summary),
            Self::Relevance(r) => format!(
                "Important email from {}\nSubject: {}\nMatched keywords: {}\nRelevant content: {}",
                message.sender.as_deref().unwrap_or("unknown sender"),
                message.subject,
                r.matched_keywords.join(", "),
                r.relevant_sentences.join(" "),
            ),
        })
    }
}

// ── Counting ────────────────────────────────────────────────────────

/// Label a classified message is counted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    High,
    Medium,
    Low,
    Matched,
    Unmatched,
}

impl Category {
    /// Line label in the cycle report.
    pub fn report_label(&self) -> &'static str {
        match self {
            Self::High => "High importance",
            Self::Medium => "Medium importance",
            Self::Low => "Low importance",
            Self::Matched => "Matched emails",
            Self::Unmatched => "Unmatched emails",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Matched => "matched",
            Self::Unmatched => "unmatched",
        };
        f.write_str(s)
    }
}

/// Counts for one triage cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Messages fetched this cycle.
    pub total: usize,
    /// Messages that failed to build or classify.
    pub skipped: usize,
    pub counts: BTreeMap<Category, usize>,
}

impl RunSummary {
    /// Zeroed summary with a slot for every category the strategy reports.
    pub fn new(categories: &[Category]) -> Self {
        Self {
            total: 0,
            skipped: 0,
            counts: categories.iter().map(|c| (*c, 0)).collect(),
        }
    }

    pub fn record(&mut self, category: Category) {
        *self.counts.entry(category).or_insert(0) += 1;
    }

    pub fn count(&self, category: Category) -> usize {
        self.counts.get(&category).copied().unwrap_or(0)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Email analysis complete:")?;
        writeln!(f, "Total new emails: {}", self.total)?;
        for (category, count) in &self.counts {
            writeln!(f, "{}: {}", category.report_label(), count)?;
        }
        write!(f, "Skipped: {}", self.skipped)
    }
}

// ── Per-message outcomes ────────────────────────────────────────────

/// Pipeline stage at which a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipStage {
    Build,
    Classify,
}

/// What happened to a notification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "delivery", rename_all = "snake_case")]
pub enum Delivery {
    NotRequired,
    Delivered(DeliveryReceipt),
    Failed { reason: String },
}

/// Result of processing one fetched message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
    Classified {
        id: String,
        category: Category,
        delivery: Delivery,
    },
    Skipped {
        id: String,
        stage: SkipStage,
        reason: String,
    },
}

impl MessageOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Classified { id, .. } | Self::Skipped { id, .. } => id,
        }
    }
}

// ── Strategy trait ──────────────────────────────────────────────────

/// A classification strategy.
///
/// Exactly one is active per triage loop.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Strategy name, for logging.
    fn name(&self) -> &'static str;

    /// Every category this strategy can produce, in report order.
    fn categories(&self) -> &'static [Category];

    async fn classify(&self, message: &NormalizedMessage) -> Result<Verdict, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> NormalizedMessage {
        NormalizedMessage::new("7", "Interview request for role", "body")
            .with_sender("Recruiter <jobs@example.com>")
    }

    fn high(summary: &str) -> Verdict {
        Verdict::Importance(Assessment {
            importance: Importance::High,
            summary: summary.into(),
        })
    }

    #[test]
    fn importance_categories() {
        assert_eq!(high("x").category(), Category::High);
        let medium = Verdict::Importance(Assessment {
            importance: Importance::Medium,
            summary: String::new(),
        });
        assert_eq!(medium.category(), Category::Medium);
        assert!(!medium.requires_notification());
        assert!(medium.notification(&message()).is_none());
        assert!(medium.evidence(&message()).is_none());
    }

    #[test]
    fn high_verdict_places_voice_call() {
        let verdict = high("Production database is down.");
        assert!(verdict.requires_notification());
        assert_eq!(
            verdict.notification(&message()),
            Some(Notification::VoiceCall {
                spoken_text: "Production database is down.".into()
            })
        );
        assert_eq!(
            verdict.evidence(&message()).as_deref(),
            Some("Important email found:\nProduction database is down.")
        );
    }

    #[test]
    fn relevance_verdict_sends_text() {
        let verdict = Verdict::Relevance(Relevance {
            matched_keywords: vec!["interview request".into()],
            relevant_sentences: vec!["We would like to schedule your interview".into()],
        });
        assert_eq!(verdict.category(), Category::Matched);
        assert_eq!(
            verdict.notification(&message()),
            Some(Notification::TextMessage {
                body: "Important email: Interview request for role\nMatched keywords: interview request"
                    .into()
            })
        );
        let evidence = verdict.evidence(&message()).unwrap();
        assert!(evidence.starts_with("Important email from Recruiter <jobs@example.com>"));
        assert!(evidence.ends_with("Relevant content: We would like to schedule your interview"));
    }

    #[test]
    fn irrelevant_verdict_is_unmatched() {
        let verdict = Verdict::Relevance(Relevance::default());
        assert_eq!(verdict.category(), Category::Unmatched);
        assert!(verdict.notification(&message()).is_none());
    }

    #[test]
    fn summary_starts_zeroed_for_every_category() {
        let summary = RunSummary::new(&[Category::High, Category::Medium, Category::Low]);
        assert_eq!(summary.counts.len(), 3);
        assert!(summary.counts.values().all(|c| *c == 0));
        assert_eq!(summary.count(Category::Matched), 0);
    }

    #[test]
    fn summary_report_lists_zero_categories() {
        let mut summary = RunSummary::new(&[Category::Matched, Category::Unmatched]);
        summary.total = 3;
        summary.skipped = 1;
        summary.record(Category::Matched);
        summary.record(Category::Matched);

        let report = summary.to_string();
        assert!(report.contains("Total new emails: 3"));
        assert!(report.contains("Matched emails: 2"));
        assert!(report.contains("Unmatched emails: 0"));
        assert!(report.ends_with("Skipped: 1"));
    }

    #[test]
    fn verdict_serialization_is_tagged() {
        let json = serde_json::to_value(high("x")).unwrap();
        assert_eq!(json["strategy"], "importance");
        assert_eq!(json["importance"], "high");
    }
}
