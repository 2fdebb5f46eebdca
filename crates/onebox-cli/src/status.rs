//! `onebox status` — show configuration, accounts, and sink status.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use onebox_core::config::{AccountConfig, Config, SearchBackend};
use onebox_core::utils::{expand_home, get_cursor_store_path, mask_secret};

/// Run the status command.
pub fn run(config: &Config, config_path: &Path) -> Result<()> {
    println!();
    println!("{}", "📬 Onebox Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        if config_path.exists() {
            "✓".green().to_string()
        } else {
            "(not found)".red().to_string()
        }
    );

    let cursors = match config.search.backend {
        SearchBackend::Memory => format!("{}", "in memory (memory search backend)".dimmed()),
        SearchBackend::Elasticsearch if config.sync.cursor_store_path.is_empty() => {
            get_cursor_store_path().display().to_string()
        }
        SearchBackend::Elasticsearch => expand_home(&config.sync.cursor_store_path)
            .display()
            .to_string(),
    };
    println!("  {:<18} {}", "Cursors:".bold(), cursors);

    // Accounts
    println!();
    println!("  {}", "Accounts:".bold());
    if config.accounts.is_empty() {
        println!("    {}", "· none configured".dimmed());
    }
    for account in &config.accounts {
        println!("    {}", account_line(account));
    }

    // Sync
    println!();
    let sync = &config.sync;
    println!(
        "  {:<18} backfill {}d | keepalive {}s | idle timeout {}s",
        "Sync:".bold(),
        sync.backfill_days,
        sync.keepalive_interval_secs,
        sync.server_idle_timeout_secs
    );
    println!(
        "  {:<18} {}",
        "Backoff:".bold(),
        format!(
            "base {}ms, cap {}s, jitter {}",
            sync.backoff_base_ms,
            sync.backoff_cap_secs,
            if sync.backoff_jitter { "on" } else { "off" }
        )
        .dimmed()
    );
    if let Err(e) = sync.validate() {
        println!("  {:<18} {} {}", "", "✗".red(), e);
    }

    // Search
    let search = match config.search.backend {
        SearchBackend::Memory => format!("memory {}", "(not persisted)".dimmed()),
        SearchBackend::Elasticsearch => {
            format!("{} index '{}'", config.search.url, config.search.index)
        }
    };
    println!("  {:<18} {}", "Search:".bold(), search);

    // Classifier
    let classifier = if config.classifier.is_configured() {
        format!(
            "{} {} (key {})",
            "✓".green(),
            config.classifier.model,
            mask_secret(&config.classifier.api_key)
        )
    } else {
        format!("{}", "· not configured, labels stay Uncategorized".dimmed())
    };
    println!("  {:<18} {}", "Classifier:".bold(), classifier);

    // Notifiers
    println!();
    println!("  {}", "Notifiers:".bold());
    for (name, url) in [
        ("Slack", &config.notifications.slack_webhook_url),
        ("Webhook", &config.notifications.webhook_url),
    ] {
        let status = if url.is_empty() {
            format!("{}", "· not configured".dimmed())
        } else {
            format!("{} (url set)", "✓".green())
        };
        println!("    {:<20} {}", name, status);
    }

    println!();
    Ok(())
}

/// One status row: the account id with a validity mark, or the reason it will be skipped.
fn account_line(account: &AccountConfig) -> String {
    match account.clone().resolve() {
        Ok(a) => format!(
            "{} {:<28} {}",
            "✓".green(),
            a.account_id,
            format!("{}:{} {}", a.host, a.port, a.mailbox).dimmed()
        ),
        Err(e) => format!("{} {}", "✗".red(), e),
    }
}
