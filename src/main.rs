use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use inbox_triage::config::{Strategy, TriageConfig};
use inbox_triage::llm::{EmbeddingConfig, LlmConfig, create_embedder, create_provider};
use inbox_triage::mail::{ImapConfig, ImapMailbox, MailSource};
use inbox_triage::notify::{LogNotifier, Notifier, TwilioConfig, TwilioNotifier};
use inbox_triage::triage::{
    Classifier, ImportanceClassifier, IntervalTicker, KeywordMatcher, TriageLoop,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = TriageConfig::from_env().context("Invalid triage configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref())?;

    let imap_config = ImapConfig::from_env().context("Invalid IMAP configuration")?;

    eprintln!("📬 Inbox Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Mailbox: {}@{}:{} (unread since {})",
        imap_config.username,
        imap_config.host,
        imap_config.port,
        imap_config.since.format("%d-%b-%Y")
    );
    eprintln!("   Strategy: {}", config.strategy);

    // ── Classifier ──────────────────────────────────────────────────────
    let classifier: Arc<dyn Classifier> = match config.strategy {
        Strategy::Importance => {
            let llm_config = LlmConfig::from_env().context("Invalid LLM configuration")?;
            let llm = create_provider(&llm_config)?;
            eprintln!("   Model: {}", llm.model_name());
            Arc::new(ImportanceClassifier::new(llm))
        }
        Strategy::Keywords => {
            let embedding_config =
                EmbeddingConfig::from_env().context("Invalid embedding configuration")?;
            let embedder = create_embedder(&embedding_config)?;
            eprintln!("   Embeddings: {}", embedder.model_name());
            eprintln!(
                "   Keywords: {} (threshold {})",
                config.keywords.join(", "),
                config.threshold
            );
            Arc::new(KeywordMatcher::new(
                embedder,
                config.keywords.clone(),
                config.threshold,
            )?)
        }
    };

    // ── Notifier ────────────────────────────────────────────────────────
    let notifier: Arc<dyn Notifier> = match TwilioConfig::from_env()? {
        Some(twilio_config) => {
            eprintln!("   Notifications: Twilio (to {})", twilio_config.to_number);
            Arc::new(TwilioNotifier::new(twilio_config))
        }
        None => {
            eprintln!("   Notifications: dry run (TWILIO_* not set)");
            Arc::new(LogNotifier)
        }
    };

    let source: Arc<dyn MailSource> = Arc::new(ImapMailbox::new(imap_config));
    let triage = TriageLoop::new(source, classifier, notifier);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    if config.run_once {
        eprintln!("   Mode: single pass\n");
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = triage.run_cycle() => return Ok(()),
        }
    } else {
        eprintln!(
            "   Mode: polling every {}s\n",
            config.poll_interval.as_secs()
        );
        let mut ticker = IntervalTicker::new(config.poll_interval);
        triage.run(&mut ticker, cancel).await;
    }

    println!("\nTriage terminated by user.");
    Ok(())
}

/// Console logging, plus daily-rolling files when `log_dir` is set.
///
/// The returned guard must live as long as the process so buffered file
/// output is flushed.
fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, "inbox-triage.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();

    Ok(Some(guard))
}
