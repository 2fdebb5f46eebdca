//! Configuration schema.
//!
//! Hierarchy: `Config` → `accounts[]`, `SyncConfig`, `SearchConfig`,
//! `ClassifierConfig`, `NotificationsConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.onebox/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub accounts: Vec<AccountConfig>,
    pub sync: SyncConfig,
    pub search: SearchConfig,
    pub classifier: ClassifierConfig,
    pub notifications: NotificationsConfig,
}

// ─────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────

/// One mailbox the engine synchronizes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountConfig {
    /// Stable account identifier. Falls back to `username` when empty.
    #[serde(default)]
    pub account_id: String,
    /// IMAP login username (usually the email address).
    #[serde(default)]
    pub username: String,
    /// IMAP login password or app password.
    #[serde(default)]
    pub password: String,
    /// IMAP server hostname.
    #[serde(default)]
    pub host: String,
    /// IMAP server port (default 993 for IMAPS).
    #[serde(default = "default_imap_port")]
    pub port: u16,
    /// Folder to synchronize (default "INBOX").
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// Use IMAPS (TLS from the start). Default true.
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

fn default_imap_port() -> u16 { 993 }
fn default_mailbox() -> String { "INBOX".to_string() }
fn default_true() -> bool { true }

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            username: String::new(),
            password: String::new(),
            host: String::new(),
            port: default_imap_port(),
            mailbox: default_mailbox(),
            use_tls: true,
        }
    }
}

impl AccountConfig {
    /// Effective account id (`account_id`, or `username` when unset).
    pub fn id(&self) -> &str {
        if self.account_id.is_empty() {
            &self.username
        } else {
            &self.account_id
        }
    }

    /// Validate required fields and fill in derived defaults.
    ///
    /// Returns the account with `account_id` populated and an empty
    /// mailbox name replaced by `INBOX`.
    pub fn resolve(mut self) -> Result<AccountConfig, ConfigError> {
        let label = if self.id().is_empty() {
            self.host.clone()
        } else {
            self.id().to_string()
        };

        let required: [(&'static str, &str); 3] = [
            ("username", &self.username),
            ("password", &self.password),
            ("host", &self.host),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    account: label,
                    field,
                });
            }
        }
        if self.port == 0 {
            return Err(ConfigError::MissingField {
                account: label,
                field: "port",
            });
        }

        if self.account_id.is_empty() {
            self.account_id = self.username.clone();
        }
        if self.mailbox.trim().is_empty() {
            self.mailbox = default_mailbox();
        }
        Ok(self)
    }
}

// ─────────────────────────────────────────────
// Sync engine
// ─────────────────────────────────────────────

/// Session, backoff, keepalive, and pipeline tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Backfill window in days, relative to session start.
    pub backfill_days: u32,
    /// Watch renewal interval. Must be shorter than `server_idle_timeout_secs`.
    pub keepalive_interval_secs: u64,
    /// How long the server keeps an idle watch open.
    pub server_idle_timeout_secs: u64,
    /// First reconnect delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Upper bound on the reconnect delay.
    pub backoff_cap_secs: u64,
    /// Add up to 10% random jitter to reconnect delays.
    pub backoff_jitter: bool,
    /// Concurrent pipeline invocations per account during backfill.
    pub pipeline_concurrency: usize,
    /// Messages fetched per round trip.
    pub fetch_batch_size: usize,
    /// Upper bound on connect, TLS handshake, and login.
    pub connect_timeout_secs: u64,
    /// Grace period for sessions to close on shutdown.
    pub shutdown_grace_secs: u64,
    /// Truncate message bodies to this many characters (0 = no limit).
    pub max_body_chars: usize,
    /// Where cursors are persisted. Empty = `~/.onebox/cursors.json`.
    pub cursor_store_path: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backfill_days: 30,
            keepalive_interval_secs: 29 * 60,
            server_idle_timeout_secs: 30 * 60,
            backoff_base_ms: 1000,
            backoff_cap_secs: 5 * 60,
            backoff_jitter: true,
            pipeline_concurrency: 4,
            fetch_batch_size: 25,
            connect_timeout_secs: 30,
            shutdown_grace_secs: 10,
            max_body_chars: 0,
            cursor_store_path: String::new(),
        }
    }
}

impl SyncConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn server_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.server_idle_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Validate global settings. Unlike account errors these refuse startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keepalive_interval_secs == 0
            || self.keepalive_interval_secs >= self.server_idle_timeout_secs
        {
            return Err(ConfigError::Invalid(format!(
                "keepaliveIntervalSecs ({}) must be > 0 and shorter than serverIdleTimeoutSecs ({})",
                self.keepalive_interval_secs, self.server_idle_timeout_secs
            )));
        }
        if self.pipeline_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "pipelineConcurrency must be at least 1".into(),
            ));
        }
        if self.fetch_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "fetchBatchSize must be at least 1".into(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "connectTimeoutSecs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Search
// ─────────────────────────────────────────────

/// Which search index backend to write to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    Memory,
    #[default]
    Elasticsearch,
}

/// Search index settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchConfig {
    pub backend: SearchBackend,
    /// Elasticsearch base URL.
    pub url: String,
    /// Index name.
    pub index: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: SearchBackend::Elasticsearch,
            url: "http://localhost:9200".to_string(),
            index: "emails".to_string(),
        }
    }
}

// ─────────────────────────────────────────────
// Classifier
// ─────────────────────────────────────────────

/// OpenAI-compatible chat completions endpoint used for labelling.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassifierConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ClassifierConfig {
    /// Whether an API key is set.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ─────────────────────────────────────────────
// Notifications
// ─────────────────────────────────────────────

/// Sinks notified when an `Interested` email arrives.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationsConfig {
    /// Slack incoming webhook URL.
    pub slack_webhook_url: String,
    /// Generic JSON webhook URL.
    pub webhook_url: String,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
