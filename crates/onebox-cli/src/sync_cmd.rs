//! `onebox sync` — run every account session until Ctrl+C.
//!
//! Startup sequence:
//! 1. Validate global sync settings (invalid → refuse to start)
//! 2. Build the search index, classifier, and notifiers from config
//! 3. Build the ingestion pipeline and the JSON cursor store
//! 4. Start the supervisor (invalid/duplicate accounts are skipped)
//! 5. Log lifecycle events until Ctrl+C, then shut down within the grace period

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tracing::{error, info, warn};

use onebox_core::config::{ClassifierConfig, Config, NotificationsConfig, SearchBackend, SyncConfig};
use onebox_core::utils::{expand_home, get_cursor_store_path};
use onebox_providers::{
    ImapConnector, LlmClassifier, MailParser, NoopClassifier, SlackNotifier, WebhookNotifier,
};
use onebox_sync::{
    Classifier, CursorStore, IngestionPipeline, JsonCursorStore, MemoryCursorStore, Notifier,
    SessionEvent, SessionSettings, SyncContext, SyncSupervisor,
};

use crate::helpers;

/// Run the sync engine.
pub async fn run(config: Config) -> Result<()> {
    helpers::print_banner("sync");

    config.sync.validate().context("invalid sync settings")?;

    let index = helpers::build_index(&config.search, true).await?;
    let classifier = build_classifier(&config.classifier);
    let mut pipeline = IngestionPipeline::new(Arc::new(MailParser::new()), classifier, index)
        .with_max_body_chars(config.sync.max_body_chars);
    for notifier in build_notifiers(&config.notifications) {
        pipeline = pipeline.with_notifier(notifier);
    }
    let notifiers = pipeline.notifier_names();

    let (cursors, cursor_path) = build_cursor_store(&config);
    let ctx = SyncContext {
        connector: Arc::new(ImapConnector::new().with_connect_timeout(config.sync.connect_timeout())),
        pipeline: Arc::new(pipeline),
        cursors,
        settings: SessionSettings::from_config(&config.sync),
    };

    let mut supervisor = SyncSupervisor::new(ctx);
    let report = supervisor.start(config.accounts.clone());

    println!("  Accounts:  {} started", report.started.len());
    for (account, reason) in &report.skipped {
        println!("  {} skipped {}: {}", "⚠".yellow(), account, reason);
    }
    println!("  Search:    {:?} ({})", config.search.backend, config.search.index);
    match &cursor_path {
        Some(path) => println!("  Cursors:   {}", path.display()),
        None => println!("  Cursors:   {}", "in memory, backfill runs on every start".dimmed()),
    }
    println!(
        "  Notifiers: {}",
        if notifiers.is_empty() {
            "none".dimmed().to_string()
        } else {
            notifiers.join(", ")
        }
    );
    println!();

    if supervisor.is_empty() {
        bail!("no valid accounts configured; add accounts to the config file or set IMAP_USER_1/IMAP_PASS_1/IMAP_HOST_1");
    }

    println!("  Ctrl+C to stop");
    println!();

    loop {
        tokio::select! {
            event = supervisor.next_event() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("  Shutting down...");
                info!("received Ctrl+C, shutting down");
                break;
            }
        }
    }

    let report = supervisor.shutdown(config.sync.shutdown_grace()).await;
    for summary in &report.closed {
        println!(
            "  {} {}: {} ingested, {} dropped, {} reconnects",
            helpers::mark(true),
            summary.account_id,
            summary.ingested,
            summary.dropped,
            summary.reconnects
        );
    }
    for account in report.failed.iter().chain(&report.forced) {
        println!("  {} {}: did not close cleanly", helpers::mark(false), account);
    }
    println!("  Sync stopped. Goodbye!");
    Ok(())
}

fn build_classifier(config: &ClassifierConfig) -> Arc<dyn Classifier> {
    if config.is_configured() {
        info!(model = %config.model, api_base = %config.api_base, "classifier enabled");
        Arc::new(LlmClassifier::new(config))
    } else {
        warn!("no classifier API key configured, every email will be Uncategorized");
        Arc::new(NoopClassifier)
    }
}

/// One sink per configured URL.
fn build_notifiers(config: &NotificationsConfig) -> Vec<Arc<dyn Notifier>> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
    if !config.slack_webhook_url.is_empty() {
        notifiers.push(Arc::new(SlackNotifier::new(config.slack_webhook_url.clone())));
    }
    if !config.webhook_url.is_empty() {
        notifiers.push(Arc::new(WebhookNotifier::new(config.webhook_url.clone())));
    }
    notifiers
}

/// Cursors are only persisted when the index is. A file cursor next to a
/// fresh memory index would skip the backfill and leave old mail unsearchable.
fn build_cursor_store(config: &Config) -> (Arc<dyn CursorStore>, Option<PathBuf>) {
    match config.search.backend {
        SearchBackend::Memory => (Arc::new(MemoryCursorStore::new()), None),
        SearchBackend::Elasticsearch => {
            let path = cursor_store_path(&config.sync);
            (Arc::new(JsonCursorStore::new(path.clone())), Some(path))
        }
    }
}

fn cursor_store_path(config: &SyncConfig) -> PathBuf {
    if config.cursor_store_path.is_empty() {
        get_cursor_store_path()
    } else {
        expand_home(&config.cursor_store_path)
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Started { account_id } => info!(account = %account_id, "session started"),
        SessionEvent::StateChanged { account_id, state } => {
            info!(account = %account_id, state = %state, "session state changed")
        }
        SessionEvent::Reconnecting {
            account_id,
            attempt,
            delay,
            error,
        } => warn!(
            account = %account_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "session reconnecting"
        ),
        SessionEvent::Closed { account_id } => info!(account = %account_id, "session closed"),
        SessionEvent::Failed { account_id, error } => {
            error!(account = %account_id, error = %error, "session failed")
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use onebox_core::types::Cursor;

    #[test]
    fn notifiers_follow_config() {
        assert!(build_notifiers(&NotificationsConfig::default()).is_empty());

        let config = NotificationsConfig {
            slack_webhook_url: "https://hooks.slack.com/services/T/B/X".into(),
            webhook_url: "https://webhook.site/abc".into(),
        };
        let names: Vec<String> = build_notifiers(&config)
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names, vec!["slack", "webhook"]);
    }

    #[tokio::test]
    async fn classifier_falls_back_to_noop() {
        let classifier = build_classifier(&ClassifierConfig::default());
        let category = classifier.classify("Hi", "Interested!").await.unwrap();
        assert_eq!(category, onebox_core::types::Category::Uncategorized);
    }

    #[test]
    fn cursor_path_default_and_override() {
        assert!(cursor_store_path(&SyncConfig::default()).ends_with("cursors.json"));

        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("state.json");
        let config = SyncConfig {
            cursor_store_path: custom.to_string_lossy().into_owned(),
            ..SyncConfig::default()
        };
        assert_eq!(cursor_store_path(&config), custom);
    }

    #[tokio::test]
    async fn cursor_store_follows_search_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        JsonCursorStore::new(path.clone())
            .save("a@x.com", Cursor::new(Some(7), 42))
            .await
            .unwrap();

        let mut config = Config::default();
        config.sync.cursor_store_path = path.to_string_lossy().into_owned();

        let (store, persisted) = build_cursor_store(&config);
        assert_eq!(persisted, Some(path.clone()));
        assert_eq!(store.load("a@x.com").await.unwrap(), Some(Cursor::new(Some(7), 42)));

        config.search.backend = SearchBackend::Memory;
        let (store, persisted) = build_cursor_store(&config);
        assert!(persisted.is_none());
        assert!(store.load("a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn run_refuses_invalid_sync_settings() {
        let mut config = Config::default();
        config.sync.keepalive_interval_secs = config.sync.server_idle_timeout_secs;
        let err = run(config).await.unwrap_err();
        assert!(err.to_string().contains("invalid sync settings"));
    }

    #[tokio::test]
    async fn run_without_accounts_fails() {
        let mut config = Config::default();
        config.search.backend = onebox_core::config::SearchBackend::Memory;
        let err = run(config).await.unwrap_err();
        assert!(err.to_string().contains("no valid accounts"));
    }
}
