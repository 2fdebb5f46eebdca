//! Query commands against the configured search index.
//!
//! - `onebox search [-q TEXT] [--account ID] [--folder NAME] [--category LABEL] [--page N] [--limit N] [--json]`
//! - `onebox accounts` — distinct account ids
//! - `onebox folders [--account ID]` — distinct folders
//! - `onebox show <ID> [--json]` — one email, full body
//! - `onebox categorize <ID> <CATEGORY>` — manual label correction

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use serde_json::json;

use onebox_core::config::{Config, SearchBackend};
use onebox_core::types::{Category, ClassifiedEmail};
use onebox_core::utils::truncate_string;
use onebox_sync::{IndexField, SearchFilters, SearchIndex, SearchPage};

use crate::helpers;

/// Arguments of `onebox search`.
#[derive(Clone, Debug, Default)]
pub struct SearchArgs {
    pub query: Option<String>,
    pub account: Option<String>,
    pub folder: Option<String>,
    pub category: Option<String>,
    pub page: usize,
    pub limit: usize,
    pub json: bool,
}

impl SearchArgs {
    fn filters(&self) -> Result<SearchFilters> {
        let category = self
            .category
            .as_deref()
            .map(|c| c.parse::<Category>().map_err(|e| anyhow!(e)))
            .transpose()?;
        Ok(SearchFilters {
            text: self.query.clone().filter(|q| !q.trim().is_empty()),
            account_id: self.account.clone(),
            folder: self.folder.clone(),
            category,
        })
    }
}

// ─────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────

/// `onebox search`
pub async fn search(config: &Config, args: SearchArgs) -> Result<()> {
    let index = open_index(config).await?;
    let page = run_search(index.as_ref(), &args).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&page_json(&page))?);
        return Ok(());
    }

    if page.items.is_empty() {
        println!("  No emails found.");
        return Ok(());
    }
    for line in render_page(&page) {
        println!("{}", line);
    }
    Ok(())
}

/// `onebox accounts`
pub async fn accounts(config: &Config) -> Result<()> {
    let index = open_index(config).await?;
    let values = index
        .distinct_values(IndexField::AccountId, None)
        .await
        .context("failed to list accounts")?;
    print_list("Accounts", &values);
    Ok(())
}

/// `onebox folders [--account ID]`
pub async fn folders(config: &Config, account: Option<String>) -> Result<()> {
    let index = open_index(config).await?;
    let filter = account.map(SearchFilters::for_account);
    let values = index
        .distinct_values(IndexField::Folder, filter.as_ref())
        .await
        .context("failed to list folders")?;
    print_list("Folders", &values);
    Ok(())
}

/// `onebox show <ID>`. Fails when the id is not indexed.
pub async fn show(config: &Config, id: &str, json: bool) -> Result<()> {
    let index = open_index(config).await?;
    let record = find_email(index.as_ref(), id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }
    for line in render_email(&record) {
        println!("{}", line);
    }
    Ok(())
}

/// `onebox categorize <ID> <CATEGORY>`
pub async fn categorize(config: &Config, id: &str, category: &str) -> Result<()> {
    let index = open_index(config).await?;
    let category = set_category(index.as_ref(), id, category).await?;
    println!(
        "  {} {} is now {}",
        helpers::mark(true),
        id.cyan(),
        helpers::colored_category(category)
    );
    Ok(())
}

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

/// The memory backend lives inside `onebox sync`, so a fresh one here is always empty.
async fn open_index(config: &Config) -> Result<Arc<dyn SearchIndex>> {
    if config.search.backend == SearchBackend::Memory {
        println!(
            "  {} search backend is memory; results only exist inside a running sync",
            "⚠".yellow()
        );
    }
    helpers::build_index(&config.search, false).await
}

async fn run_search(index: &dyn SearchIndex, args: &SearchArgs) -> Result<SearchPage> {
    let filters = args.filters()?;
    index
        .query(&filters, args.page, args.limit)
        .await
        .context("search failed")
}

async fn find_email(index: &dyn SearchIndex, id: &str) -> Result<ClassifiedEmail> {
    match index
        .get(id)
        .await
        .with_context(|| format!("failed to load {}", id))?
    {
        Some(record) => Ok(record),
        None => bail!("email '{}' not found", id),
    }
}

async fn set_category(index: &dyn SearchIndex, id: &str, category: &str) -> Result<Category> {
    let category: Category = category.parse().map_err(|e: String| anyhow!(e))?;
    index
        .update_field(id, IndexField::Category, category.as_str())
        .await
        .with_context(|| format!("failed to update category of {}", id))?;
    Ok(category)
}

fn page_json(page: &SearchPage) -> serde_json::Value {
    json!({
        "total": page.total,
        "page": page.page,
        "limit": page.limit,
        "items": page.items,
    })
}

/// Table lines for one page of results.
fn render_page(page: &SearchPage) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        format!(
            "  {:<17} {:<24} {:<15} {:<28} {}",
            "Date".bold(),
            "Account".bold(),
            "Category".bold(),
            "From".bold(),
            "Subject".bold(),
        ),
        format!("  {}", "─".repeat(110)),
    ];

    for record in &page.items {
        let e = &record.email;
        let category = format!("{:<15}", record.category.as_str());
        lines.push(format!(
            "  {:<17} {:<24} {} {:<28} {}",
            helpers::format_date(e.date),
            truncate_string(&e.account_id, 24),
            category.replace(record.category.as_str(), &helpers::colored_category(record.category)),
            truncate_string(&e.from, 28),
            truncate_string(&e.subject, 60),
        ));
    }

    let pages = page.total.div_ceil(page.limit.max(1));
    lines.push(String::new());
    lines.push(format!(
        "  {}",
        format!("page {} of {} · {} emails", page.page, pages.max(1), page.total).dimmed()
    ));
    lines.push(String::new());
    lines
}

/// Header block plus body of one email.
fn render_email(record: &ClassifiedEmail) -> Vec<String> {
    let e = &record.email;
    let mut lines = vec![
        String::new(),
        format!("  {:<12} {}", "Id:".bold(), e.id),
        format!("  {:<12} {}", "Account:".bold(), e.account_id),
        format!("  {:<12} {}", "Folder:".bold(), e.folder),
        format!("  {:<12} {}", "Date:".bold(), helpers::format_date(e.date)),
        format!("  {:<12} {}", "From:".bold(), e.from),
        format!("  {:<12} {}", "To:".bold(), e.to.join(", ")),
    ];
    if !e.cc.is_empty() {
        lines.push(format!("  {:<12} {}", "Cc:".bold(), e.cc.join(", ")));
    }
    lines.push(format!("  {:<12} {}", "Subject:".bold(), e.subject));
    lines.push(format!(
        "  {:<12} {}",
        "Category:".bold(),
        helpers::colored_category(record.category)
    ));
    if e.has_attachments {
        lines.push(format!("  {:<12} yes", "Attachments:".bold()));
    }
    lines.push(format!("  {}", "─".repeat(76)));
    lines.extend(e.body.lines().map(|l| format!("  {}", l)));
    lines.push(String::new());
    lines
}

fn print_list(title: &str, values: &[String]) {
    if values.is_empty() {
        println!("  No {} found.", title.to_lowercase());
        return;
    }
    println!();
    println!("{}", format!("  {}", title).cyan().bold());
    for value in values {
        println!("    {}", value);
    }
    println!();
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use onebox_core::types::{ClassifiedEmail, NormalizedEmail};
    use onebox_providers::MemoryIndex;

    fn record(id: &str, category: Category, day: u32) -> ClassifiedEmail {
        let date = Utc.with_ymd_and_hms(2024, 5, day, 9, 0, 0).unwrap();
        ClassifiedEmail::new(
            NormalizedEmail {
                id: id.into(),
                account_id: "a@x.com".into(),
                folder: "INBOX".into(),
                subject: format!("Subject {}", id),
                body: "Let's set up a demo".into(),
                from: "bob@y.com".into(),
                to: vec!["a@x.com".into()],
                cc: Vec::new(),
                bcc: Vec::new(),
                date,
                message_id: String::new(),
                has_attachments: false,
                indexed_at: date,
            },
            category,
        )
    }

    async fn seeded() -> MemoryIndex {
        let index = MemoryIndex::new();
        for r in [
            record("m1", Category::Interested, 1),
            record("m2", Category::Spam, 2),
        ] {
            index.upsert(r.id(), &r).await.unwrap();
        }
        index
    }

    #[test]
    fn filters_parse_category() {
        let args = SearchArgs {
            query: Some("  ".into()),
            category: Some("meeting booked".into()),
            ..SearchArgs::default()
        };
        let filters = args.filters().unwrap();
        assert_eq!(filters.category, Some(Category::MeetingBooked));
        assert!(filters.text.is_none());
    }

    #[test]
    fn filters_reject_unknown_category() {
        let args = SearchArgs {
            category: Some("Later".into()),
            ..SearchArgs::default()
        };
        assert!(args.filters().is_err());
    }

    #[tokio::test]
    async fn search_filters_by_category() {
        let index = seeded().await;
        let args = SearchArgs {
            category: Some("Interested".into()),
            page: 1,
            limit: 20,
            ..SearchArgs::default()
        };
        let page = run_search(&index, &args).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id(), "m1");
    }

    #[tokio::test]
    async fn categorize_overwrites_label() {
        let index = seeded().await;
        let category = set_category(&index, "m2", "not interested").await.unwrap();
        assert_eq!(category, Category::NotInterested);
        assert_eq!(
            index.get("m2").await.unwrap().unwrap().category,
            Category::NotInterested
        );
        assert!(set_category(&index, "missing", "Spam").await.is_err());
        assert!(set_category(&index, "m2", "Later").await.is_err());
    }

    #[tokio::test]
    async fn render_and_json() {
        colored::control::set_override(false);
        let index = seeded().await;
        let args = SearchArgs {
            page: 1,
            limit: 1,
            ..SearchArgs::default()
        };
        let page = run_search(&index, &args).await.unwrap();

        let lines = render_page(&page);
        assert!(lines.iter().any(|l| l.contains("Subject m2")));
        assert!(lines.iter().any(|l| l.contains("page 1 of 2 · 2 emails")));

        let value = page_json(&page);
        assert_eq!(value["total"], 2);
        assert_eq!(value["items"][0]["aiCategory"], "Spam");
    }

    #[tokio::test]
    async fn show_finds_indexed_email() {
        colored::control::set_override(false);
        let index = seeded().await;
        let record = find_email(&index, "m1").await.unwrap();
        assert_eq!(record.category, Category::Interested);

        let lines = render_email(&record);
        assert!(lines.iter().any(|l| l.contains("Subject m1")));
        assert!(lines.iter().any(|l| l.contains("Interested")));
        assert!(lines.iter().any(|l| l.trim() == "Let's set up a demo"));
    }

    #[tokio::test]
    async fn show_missing_email_fails() {
        let index = seeded().await;
        let err = find_email(&index, "nope").await.unwrap_err();
        assert!(err.to_string().contains("'nope' not found"));
    }
}
