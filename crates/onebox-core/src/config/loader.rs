//! Config loader — reads `~/.onebox/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.onebox/config.json`
//! 3. Environment variables `ONEBOX_<SECTION>__<FIELD>` (override JSON)
//! 4. Numbered account variables `IMAP_USER_n`, `IMAP_PASS_n`, `IMAP_HOST_n`,
//!    `IMAP_PORT_n` plus `SLACK_WEBHOOK_URL`, `WEBHOOK_SITE_URL`, and
//!    `ELASTICSEARCH_HOST`, which fill gaps but never override the file

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info, warn};

use super::schema::{AccountConfig, Config, SearchBackend};

/// Highest `n` checked for `IMAP_USER_n`.
const MAX_ENV_ACCOUNTS: usize = 9;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    let config = load_config_from_path(&config_path);
    let config = apply_env_overrides(config);
    apply_env_fallbacks(config, |key| std::env::var(key).ok())
}

/// Load config from a specific file path, without env processing.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return Config::default();
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return Config::default();
        }
    };

    match serde_json::from_str::<Config>(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            Config::default()
        }
    }
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> anyhow::Result<PathBuf> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&config_path, json)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    debug!("Config saved to {}", config_path.display());
    Ok(config_path)
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `ONEBOX_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `ONEBOX_SYNC__BACKFILL_DAYS` → `sync.backfill_days`
/// - `ONEBOX_SYNC__KEEPALIVE_INTERVAL_SECS` → `sync.keepalive_interval_secs`
/// - `ONEBOX_SYNC__PIPELINE_CONCURRENCY` → `sync.pipeline_concurrency`
/// - `ONEBOX_SEARCH__BACKEND` → `search.backend` (`memory` | `elasticsearch`)
/// - `ONEBOX_SEARCH__URL` → `search.url`
/// - `ONEBOX_SEARCH__INDEX` → `search.index`
/// - `ONEBOX_CLASSIFIER__API_KEY` → `classifier.api_key`
/// - `ONEBOX_CLASSIFIER__API_BASE` → `classifier.api_base`
/// - `ONEBOX_CLASSIFIER__MODEL` → `classifier.model`
/// - `ONEBOX_NOTIFICATIONS__SLACK_WEBHOOK_URL` → `notifications.slack_webhook_url`
/// - `ONEBOX_NOTIFICATIONS__WEBHOOK_URL` → `notifications.webhook_url`
fn apply_env_overrides(mut config: Config) -> Config {
    // Sync
    if let Ok(val) = std::env::var("ONEBOX_SYNC__BACKFILL_DAYS") {
        if let Ok(n) = val.parse::<u32>() {
            config.sync.backfill_days = n;
        }
    }
    if let Ok(val) = std::env::var("ONEBOX_SYNC__KEEPALIVE_INTERVAL_SECS") {
        if let Ok(n) = val.parse::<u64>() {
            config.sync.keepalive_interval_secs = n;
        }
    }
    if let Ok(val) = std::env::var("ONEBOX_SYNC__PIPELINE_CONCURRENCY") {
        if let Ok(n) = val.parse::<usize>() {
            config.sync.pipeline_concurrency = n;
        }
    }

    // Search
    if let Ok(val) = std::env::var("ONEBOX_SEARCH__BACKEND") {
        match val.to_lowercase().as_str() {
            "memory" => config.search.backend = SearchBackend::Memory,
            "elasticsearch" => config.search.backend = SearchBackend::Elasticsearch,
            other => warn!(value = %other, "ignoring unknown ONEBOX_SEARCH__BACKEND"),
        }
    }
    if let Ok(val) = std::env::var("ONEBOX_SEARCH__URL") {
        config.search.url = val;
    }
    if let Ok(val) = std::env::var("ONEBOX_SEARCH__INDEX") {
        config.search.index = val;
    }

    // Classifier
    if let Ok(val) = std::env::var("ONEBOX_CLASSIFIER__API_KEY") {
        config.classifier.api_key = val;
    }
    if let Ok(val) = std::env::var("ONEBOX_CLASSIFIER__API_BASE") {
        config.classifier.api_base = val;
    }
    if let Ok(val) = std::env::var("ONEBOX_CLASSIFIER__MODEL") {
        config.classifier.model = val;
    }

    // Notifications
    if let Ok(val) = std::env::var("ONEBOX_NOTIFICATIONS__SLACK_WEBHOOK_URL") {
        config.notifications.slack_webhook_url = val;
    }
    if let Ok(val) = std::env::var("ONEBOX_NOTIFICATIONS__WEBHOOK_URL") {
        config.notifications.webhook_url = val;
    }

    config
}

/// Fill gaps from the plain deployment variables.
///
/// `lookup` abstracts `std::env::var` so tests can pass a map.
fn apply_env_fallbacks(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    if config.notifications.slack_webhook_url.is_empty() {
        if let Some(url) = lookup("SLACK_WEBHOOK_URL") {
            config.notifications.slack_webhook_url = url;
        }
    }
    if config.notifications.webhook_url.is_empty() {
        if let Some(url) = lookup("WEBHOOK_SITE_URL") {
            config.notifications.webhook_url = url;
        }
    }
    if let Some(url) = lookup("ELASTICSEARCH_HOST") {
        if config.search.url == super::schema::SearchConfig::default().url {
            config.search.url = url;
        }
    }

    for account in accounts_from_env(&lookup) {
        let exists = config
            .accounts
            .iter()
            .any(|a| a.id() == account.id() || a.username == account.username);
        if !exists {
            debug!(account = %account.id(), "added account from environment");
            config.accounts.push(account);
        }
    }

    config
}

/// Read numbered `IMAP_*_n` variables into account configs.
///
/// An account is produced only when user, password, and host are all set.
fn accounts_from_env(lookup: &impl Fn(&str) -> Option<String>) -> Vec<AccountConfig> {
    let mut accounts = Vec::new();
    for i in 1..=MAX_ENV_ACCOUNTS {
        let user = lookup(&format!("IMAP_USER_{i}"));
        let pass = lookup(&format!("IMAP_PASS_{i}"));
        let host = lookup(&format!("IMAP_HOST_{i}"));
        let (Some(username), Some(password), Some(host)) = (user, pass, host) else {
            continue;
        };
        let port = lookup(&format!("IMAP_PORT_{i}"))
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(993);

        accounts.push(AccountConfig {
            account_id: username.clone(),
            username,
            password,
            host,
            port,
            ..AccountConfig::default()
        });
    }
    accounts
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
