//! Configuration types.
//!
//! Everything is read from environment variables. Each `from_env()` has a
//! `from_lookup()` twin so tests can supply variables without touching
//! the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Variable lookup function (`std::env::var` in production).
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Keywords watched by the relevance strategy when none are configured.
pub const DEFAULT_KEYWORDS: &[&str] = &["job opportunity", "career opening", "interview request"];

/// Default similarity threshold for keyword matches.
pub const DEFAULT_THRESHOLD: f32 = 0.7;

/// Default sleep between triage cycles.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Read a variable from the process environment. Empty values count as unset.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn require_var(lookup: Lookup<'_>, key: &str) -> Result<String, ConfigError> {
    lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

pub(crate) fn parse_var<T>(lookup: Lookup<'_>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Which classification strategy the triage loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// LLM importance triage; High verdicts place a voice call.
    Importance,
    /// Embedding keyword matching; matches send a text message.
    Keywords,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "importance" | "llm" => Ok(Self::Importance),
            "keywords" | "keyword" | "relevance" => Ok(Self::Keywords),
            other => Err(format!("unknown strategy '{other}' (expected importance|keywords)")),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Importance => write!(f, "importance"),
            Self::Keywords => write!(f, "keywords"),
        }
    }
}

/// Triage loop configuration.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub strategy: Strategy,
    /// Keywords for the relevance strategy, in priority order.
    pub keywords: Vec<String>,
    /// Similarity must be strictly greater than this to match.
    pub threshold: f32,
    /// Sleep between cycles.
    pub poll_interval: Duration,
    /// Run a single cycle and exit.
    pub run_once: bool,
    /// Directory for rolling log files, if any.
    pub log_dir: Option<PathBuf>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Importance,
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            threshold: DEFAULT_THRESHOLD,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            run_once: false,
            log_dir: None,
        }
    }
}

impl TriageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let strategy = parse_var(lookup, "TRIAGE_STRATEGY", defaults.strategy)?;

        let keywords = match lookup("TRIAGE_KEYWORDS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.keywords,
        };

        let threshold = parse_var(lookup, "TRIAGE_THRESHOLD", defaults.threshold)?;
        let poll_secs = parse_var(lookup, "TRIAGE_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        let run_once = lookup("TRIAGE_RUN_ONCE")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let log_dir = lookup("TRIAGE_LOG_DIR").map(PathBuf::from);

        Ok(Self {
            strategy,
            keywords,
            threshold,
            poll_interval: Duration::from_secs(poll_secs),
            run_once,
            log_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = TriageConfig::from_lookup(&lookup_from(&[])).unwrap();
        assert_eq!(config.strategy, Strategy::Importance);
        assert_eq!(config.keywords.len(), 3);
        assert!((config.threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert!(!config.run_once);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn keywords_split_and_trimmed() {
        let config = TriageConfig::from_lookup(&lookup_from(&[
            ("TRIAGE_STRATEGY", "keywords"),
            ("TRIAGE_KEYWORDS", " invoice overdue ,, contract renewal "),
            ("TRIAGE_RUN_ONCE", "true"),
        ]))
        .unwrap();
        assert_eq!(config.strategy, Strategy::Keywords);
        assert_eq!(config.keywords, vec!["invoice overdue", "contract renewal"]);
        assert!(config.run_once);
    }

    #[test]
    fn invalid_threshold_rejected() {
        let err = TriageConfig::from_lookup(&lookup_from(&[("TRIAGE_THRESHOLD", "high")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "TRIAGE_THRESHOLD"));
    }

    #[test]
    fn unknown_strategy_rejected() {
        assert!(TriageConfig::from_lookup(&lookup_from(&[("TRIAGE_STRATEGY", "vibes")])).is_err());
    }

    #[test]
    fn strategy_display_round_trips() {
        for strategy in [Strategy::Importance, Strategy::Keywords] {
            assert_eq!(strategy.to_string().parse::<Strategy>().unwrap(), strategy);
        }
    }
}
