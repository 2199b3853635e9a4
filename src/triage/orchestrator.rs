//! Triage loop: fetch, classify, notify, report, sleep.
//!
//! Each cycle:
//! 1. `MailSource::fetch_unread()`; a fetch failure counts as an empty inbox
//! 2. Build and classify each message in order; failures skip that message only
//! 3. Notify for verdicts that need it; delivery failures are recorded, not fatal
//! 4. Print the cycle report
//!
//! Between cycles the loop waits on a `Ticker`. Cancellation interrupts
//! both the running cycle and the wait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::mail::{MailSource, RawMessage, build};
use crate::notify::Notifier;
use crate::triage::types::{
    Classifier, Delivery, MessageOutcome, RunSummary, SkipStage,
};

/// Waits between cycles.
#[async_trait]
pub trait Ticker: Send {
    async fn tick(&mut self);
}

/// Sleeps a fixed period.
#[derive(Debug, Clone)]
pub struct IntervalTicker {
    period: Duration,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        debug!(secs = self.period.as_secs(), "Sleeping until next cycle");
        tokio::time::sleep(self.period).await;
    }
}

/// Everything one cycle produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub summary: RunSummary,
    pub outcomes: Vec<MessageOutcome>,
}

/// Drives one classification strategy over the inbox.
pub struct TriageLoop {
    source: Arc<dyn MailSource>,
    classifier: Arc<dyn Classifier>,
    notifier: Arc<dyn Notifier>,
}

impl TriageLoop {
    pub fn new(
        source: Arc<dyn MailSource>,
        classifier: Arc<dyn Classifier>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            classifier,
            notifier,
        }
    }

    /// Run cycles until `cancel` fires. Returns the number of completed cycles.
    pub async fn run<T: Ticker>(&self, ticker: &mut T, cancel: CancellationToken) -> usize {
        info!(
            strategy = self.classifier.name(),
            notifier = self.notifier.name(),
            "Triage loop started"
        );
        let mut cycles = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.run_cycle() => cycles += 1,
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
        }

        info!(cycles, "Triage loop stopped");
        cycles
    }

    /// One full fetch → process → report pass.
    pub async fn run_cycle(&self) -> CycleReport {
        let span = info_span!("triage_cycle", cycle_id = %uuid::Uuid::new_v4());
        async {
            println!("\nChecking for new emails...");
            let messages = match self.source.fetch_unread().await {
                Ok(messages) => messages,
                Err(e) => {
                    error!(error = %e, "Failed to fetch unread mail");
                    Vec::new()
                }
            };

            let mut summary = RunSummary::new(self.classifier.categories());
            summary.total = messages.len();
            info!(count = messages.len(), "Fetched unread messages");

            let mut outcomes = Vec::with_capacity(messages.len());
            for raw in &messages {
                let outcome = self.process(raw).await;
                match &outcome {
                    MessageOutcome::Classified { category, .. } => summary.record(*category),
                    MessageOutcome::Skipped { .. } => summary.skipped += 1,
                }
                outcomes.push(outcome);
            }

            println!("\n{summary}");
            info!(
                total = summary.total,
                skipped = summary.skipped,
                "Cycle complete"
            );

            CycleReport { summary, outcomes }
        }
        .instrument(span)
        .await
    }

    async fn process(&self, raw: &RawMessage) -> MessageOutcome {
        let message = match build(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(id = %raw.id, error = %e, "Skipping message that could not be read");
                return MessageOutcome::Skipped {
                    id: raw.id.clone(),
                    stage: SkipStage::Build,
                    reason: e.to_string(),
                };
            }
        };

        let verdict = match self.classifier.classify(&message).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(id = %message.id, error = %e, "Skipping message that could not be classified");
                return MessageOutcome::Skipped {
                    id: message.id,
                    stage: SkipStage::Classify,
                    reason: e.to_string(),
                };
            }
        };

        let category = verdict.category();
        debug!(id = %message.id, category = %category, "Message classified");

        let delivery = match verdict.notification(&message) {
            None => Delivery::NotRequired,
            Some(notification) => {
                if let Some(evidence) = verdict.evidence(&message) {
                    println!("{evidence}\n");
                }
                match self.notifier.send(&notification).await {
                    Ok(receipt) => {
                        info!(
                            id = %message.id,
                            kind = notification.label(),
                            sid = %receipt.sid,
                            status = %receipt.status,
                            "Notification sent"
                        );
                        Delivery::Delivered(receipt)
                    }
                    Err(e) => {
                        error!(
                            id = %message.id,
                            kind = notification.label(),
                            error = %e,
                            "Notification delivery failed"
                        );
                        Delivery::Failed {
                            reason: e.to_string(),
                        }
                    }
                }
            }
        };

        MessageOutcome::Classified {
            id: message.id,
            category,
            delivery,
        }
    }
}
