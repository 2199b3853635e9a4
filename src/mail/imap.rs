//! IMAP mail source for unread INBOX messages over TLS.
//!
//! Blocking socket I/O wrapped in `spawn_blocking`. Only the handful of
//! commands the triage loop needs are spoken: LOGIN, SELECT, SEARCH,
//! FETCH, LOGOUT.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::config::{Lookup, parse_var, require_var};
use crate::error::{ConfigError, MailError};
use crate::mail::record::RawMessage;

/// Socket read timeout for the IMAP session.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Default unread-since date for the search filter.
pub const DEFAULT_SINCE: &str = "15-Aug-2024";

/// Source of raw unread messages.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Fetch every unread message matching the configured filter, in
    /// mailbox order.
    async fn fetch_unread(&self) -> Result<Vec<RawMessage>, MailError>;
}

// ── Configuration ───────────────────────────────────────────────────

/// IMAP connection configuration.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Only messages sent on or after this date are considered.
    pub since: NaiveDate,
}

impl ImapConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&crate::config::env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let host = require_var(lookup, "EMAIL_IMAP_HOST")?;
        let port = parse_var(lookup, "EMAIL_IMAP_PORT", 993)?;
        let username = require_var(lookup, "EMAIL_USERNAME")?;
        let password = SecretString::from(require_var(lookup, "EMAIL_PASSWORD")?);

        let since_raw = lookup("TRIAGE_SINCE").unwrap_or_else(|| DEFAULT_SINCE.to_string());
        let since = parse_imap_date(&since_raw).ok_or_else(|| ConfigError::InvalidValue {
            key: "TRIAGE_SINCE".into(),
            message: format!("expected DD-Mon-YYYY, got '{since_raw}'"),
        })?;

        Ok(Self {
            host,
            port,
            username,
            password,
            since,
        })
    }
}

/// Parse an IMAP search date (`15-Aug-2024`).
pub fn parse_imap_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%d-%b-%Y").ok()
}

/// Format a date for an IMAP SEARCH criterion.
pub fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// Unread messages from the INBOX of one IMAP account.
pub struct ImapMailbox {
    config: Arc<ImapConfig>,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl MailSource for ImapMailbox {
    async fn fetch_unread(&self) -> Result<Vec<RawMessage>, MailError> {
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || fetch_unread_blocking(&config))
            .await
            .map_err(|e| MailError::Task(e.to_string()))?
    }
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Response to one tagged command.
#[derive(Debug, Default)]
struct Reply {
    /// Text lines, CRLF stripped, including the tagged status line.
    lines: Vec<String>,
    /// Literal payloads (`{n}` blocks) in arrival order.
    literals: Vec<Vec<u8>>,
}

/// A logged-in IMAP session with tag bookkeeping.
struct ImapSession {
    stream: TlsStream,
    next_tag: u32,
}

impl ImapSession {
    fn connect(config: &ImapConfig) -> Result<Self, MailError> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
            MailError::Connect {
                host: config.host.clone(),
                port: config.port,
                reason: e.to_string(),
            }
        })?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
            .map_err(|e| MailError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailError::Tls(e.to_string()))?;

        let mut session = Self {
            stream: rustls::StreamOwned::new(conn, tcp),
            next_tag: 1,
        };
        let greeting = session.read_line()?;
        if !String::from_utf8_lossy(&greeting).starts_with("* OK") {
            return Err(MailError::Protocol(format!(
                "unexpected greeting: {}",
                String::from_utf8_lossy(&greeting).trim_end()
            )));
        }
        Ok(session)
    }

    fn read_line(&mut self) -> Result<Vec<u8>, MailError> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(MailError::ConnectionClosed),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(buf);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, MailError> {
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Send a command and collect everything up to its tagged status line.
    fn command(&mut self, cmd: &str) -> Result<Reply, MailError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        self.stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.stream.flush()?;

        let mut reply = Reply::default();
        loop {
            let raw = self.read_line()?;
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            if let Some(len) = literal_len(&line) {
                reply.literals.push(self.read_exact(len)?);
            }
            let done = line.starts_with(&format!("{tag} "));
            reply.lines.push(line);
            if done {
                break;
            }
        }

        let status = reply.lines.last().map(String::as_str).unwrap_or_default();
        if !is_tagged_ok(status, &tag) {
            let verb = cmd.split_whitespace().next().unwrap_or(cmd).to_string();
            return Err(MailError::CommandFailed {
                command: verb,
                response: status.to_string(),
            });
        }
        Ok(reply)
    }
}

/// Fetch unread messages. Blocking; run in spawn_blocking.
fn fetch_unread_blocking(config: &ImapConfig) -> Result<Vec<RawMessage>, MailError> {
    let mut session = ImapSession::connect(config)?;

    let login = format!(
        "LOGIN {} {}",
        quote(&config.username),
        quote(config.password.expose_secret())
    );
    session.command(&login).map_err(|e| match e {
        MailError::CommandFailed { .. } => MailError::LoginFailed {
            username: config.username.clone(),
        },
        other => other,
    })?;

    session.command("SELECT \"INBOX\"")?;

    let criteria = format!("SEARCH UNSEEN SENTSINCE {}", imap_date(config.since));
    let search = session.command(&criteria)?;
    let ids = parse_search_ids(&search.lines);
    info!(count = ids.len(), since = %imap_date(config.since), "Unread messages found");

    let mut messages = Vec::with_capacity(ids.len());
    for id in ids {
        let reply = session.command(&format!("FETCH {id} RFC822"));
        if let Some(message) = accept_fetch(&id, reply)? {
            messages.push(message);
        }
    }

    // Best effort; the messages are already in hand.
    let _ = session.command("LOGOUT");

    Ok(messages)
}

/// Turn one FETCH reply into a message.
///
/// A tagged NO/BAD (e.g. the message was expunged meanwhile) skips that
/// message only; session-level failures still end the fetch.
fn accept_fetch(
    id: &str,
    reply: Result<Reply, MailError>,
) -> Result<Option<RawMessage>, MailError> {
    match reply {
        Ok(reply) => match reply.literals.into_iter().next() {
            Some(bytes) => Ok(Some(RawMessage::new(id, bytes))),
            None => {
                debug!(id = %id, "FETCH returned no message literal");
                Ok(None)
            }
        },
        Err(MailError::CommandFailed { response, .. }) => {
            warn!(id = %id, response = %response, "FETCH failed, skipping message");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

// ── Protocol helpers (public for testing) ───────────────────────────

/// Quote a string as an IMAP quoted string.
pub fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Size of the literal announced at the end of a response line (`{123}`).
pub fn literal_len(line: &str) -> Option<usize> {
    let inner = line.trim_end().strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

/// Message sequence numbers from untagged `* SEARCH` lines.
pub fn parse_search_ids(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace())
        .filter(|id| id.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

fn is_tagged_ok(line: &str, tag: &str) -> bool {
    line.strip_prefix(tag)
        .map(str::trim_start)
        .is_some_and(|rest| rest.starts_with("OK"))
}
