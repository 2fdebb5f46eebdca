//! Shared CLI helpers: index construction and output formatting.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use colored::Colorize;

use onebox_core::config::{SearchBackend, SearchConfig};
use onebox_core::types::Category;
use onebox_providers::{ElasticsearchIndex, MemoryIndex};
use onebox_sync::SearchIndex;

/// Build the configured search index.
///
/// With `ensure`, the Elasticsearch index is created if missing.
pub async fn build_index(config: &SearchConfig, ensure: bool) -> Result<Arc<dyn SearchIndex>> {
    match config.backend {
        SearchBackend::Memory => Ok(Arc::new(MemoryIndex::new())),
        SearchBackend::Elasticsearch => {
            let index = ElasticsearchIndex::new(config)?;
            if ensure {
                index.ensure_index().await.with_context(|| {
                    format!("failed to prepare index '{}' at {}", config.index, config.url)
                })?;
            }
            Ok(Arc::new(index))
        }
    }
}

/// Print the banner shown at command start.
pub fn print_banner(mode: &str) {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}  {}", "📬 Onebox".cyan().bold(), version.dimmed(), mode.dimmed());
    println!();
}

/// `✓` / `✗` marker.
pub fn mark(ok: bool) -> String {
    if ok {
        "✓".green().to_string()
    } else {
        "✗".red().to_string()
    }
}

/// Local `YYYY-MM-DD HH:MM` for a UTC timestamp.
pub fn format_date(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Category label colored by importance.
pub fn colored_category(category: Category) -> String {
    let label = category.as_str();
    match category {
        Category::Interested => label.green().bold().to_string(),
        Category::MeetingBooked => label.cyan().to_string(),
        Category::NotInterested => label.yellow().to_string(),
        Category::Spam => label.red().to_string(),
        Category::OutOfOffice | Category::Uncategorized => label.dimmed().to_string(),
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
