//! Configuration types.
//!
//! Everything is read from `COMMS_*` environment variables. Unset values
//! fall back to defaults; set-but-invalid values are errors.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::feeds::FeedConfig;
use crate::pipeline::types::SourceKind;

const DEFAULT_DB_PATH: &str = "./data/comms.db";
const DEFAULT_FEEDS: &str = "telegram:mock,twitter:mock";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

/// Application configuration.
#[derive(Debug)]
pub struct AppConfig {
    /// SQLite/libSQL database file.
    pub db_path: PathBuf,
    /// Optional JSON rule file; built-in rules when unset.
    pub rules_path: Option<PathBuf>,
    /// Per-source fetch timeout.
    pub fetch_timeout: Duration,
    /// Refresh interval. `None` runs a single refresh and exits.
    pub poll_interval: Option<Duration>,
    /// Feeds, in the order their messages are admitted.
    pub feeds: Vec<FeedConfig>,
    /// Bearer token sent to HTTP feeds.
    pub feed_token: Option<SecretString>,
    /// Directory for the rolling log file. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            rules_path: None,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            poll_interval: None,
            feeds: vec![
                FeedConfig::Mock {
                    kind: SourceKind::Telegram,
                },
                FeedConfig::Mock {
                    kind: SourceKind::Twitter,
                },
            ],
            feed_token: None,
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (the environment, or a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let db_path = get("COMMS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        let rules_path = get("COMMS_RULES_PATH").map(PathBuf::from);

        let fetch_timeout_secs = match get("COMMS_FETCH_TIMEOUT_SECS") {
            Some(v) => parse_secs("COMMS_FETCH_TIMEOUT_SECS", &v)?,
            None => DEFAULT_FETCH_TIMEOUT_SECS,
        };
        if fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "COMMS_FETCH_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let poll_interval = match get("COMMS_POLL_INTERVAL_SECS") {
            Some(v) => match parse_secs("COMMS_POLL_INTERVAL_SECS", &v)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => None,
        };

        let feeds = parse_feeds(&get("COMMS_FEEDS").unwrap_or_else(|| DEFAULT_FEEDS.to_string()))?;

        let feed_token = get("COMMS_FEED_TOKEN").map(SecretString::from);
        let log_dir = get("COMMS_LOG_DIR").map(PathBuf::from);

        Ok(Self {
            db_path,
            rules_path,
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            poll_interval,
            feeds,
            feed_token,
            log_dir,
        })
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a whole number of seconds, got {value:?}"),
    })
}

/// Parse a comma list of `kind:mock`, `kind:file:<path>` or `kind:http:<url>`.
pub fn parse_feeds(spec: &str) -> Result<Vec<FeedConfig>, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "COMMS_FEEDS".to_string(),
        message,
    };

    let mut feeds = Vec::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.splitn(3, ':');
        let kind_str = parts.next().unwrap_or_default();
        let kind: SourceKind = kind_str
            .parse()
            .map_err(|e| invalid(format!("{entry}: {e}")))?;
        if kind == SourceKind::System {
            return Err(invalid(format!("{entry}: system is not a feed kind")));
        }

        let feed = match (parts.next(), parts.next()) {
            (Some("mock"), None) => FeedConfig::Mock { kind },
            (Some("file"), Some(path)) if !path.is_empty() => FeedConfig::File {
                kind,
                path: PathBuf::from(path),
            },
            (Some("http"), Some(url)) if !url.is_empty() => FeedConfig::Http {
                kind,
                url: url.to_string(),
            },
            _ => {
                return Err(invalid(format!(
                    "{entry}: expected kind:mock, kind:file:<path> or kind:http:<url>"
                )));
            }
        };
        feeds.push(feed);
    }

    if feeds.is_empty() {
        return Err(invalid("no feeds configured".to_string()));
    }
    Ok(feeds)
}
