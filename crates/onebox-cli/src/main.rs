//! Onebox CLI — entry point.
//!
//! # Commands
//!
//! - `onebox init` — create `~/.onebox/config.json`
//! - `onebox status` — show configuration and account status
//! - `onebox sync [--logs] [--json]` — run every account session until Ctrl+C
//! - `onebox search ...` — query the search index
//! - `onebox accounts` / `onebox folders` — list indexed accounts and folders
//! - `onebox show <ID> [--json]` — print one indexed email
//! - `onebox categorize <ID> <CATEGORY>` — correct an email's label

mod helpers;
mod onboard;
mod query_cmd;
mod status;
mod sync_cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};

use onebox_core::config::{get_config_path, load_config};
use onebox_core::utils::expand_home;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// 📬 Onebox — multi-account mailbox sync, classification, and search
#[derive(Parser)]
#[command(name = "onebox", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.onebox/config.json)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file and data directory
    Init,

    /// Show configuration and account status
    Status,

    /// Sync every configured account until Ctrl+C
    Sync {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,

        /// Emit logs as JSON lines
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Search indexed emails
    Search {
        /// Free text matched against subject and body
        #[arg(short, long)]
        query: Option<String>,

        #[arg(long)]
        account: Option<String>,

        #[arg(long)]
        folder: Option<String>,

        /// Interested, Meeting Booked, Not Interested, Spam, Out of Office, Uncategorized
        #[arg(long)]
        category: Option<String>,

        /// 1-based page number
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Print the result page as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List indexed account ids
    Accounts,

    /// List indexed folders
    Folders {
        #[arg(long)]
        account: Option<String>,
    },

    /// Print one indexed email
    Show {
        /// Email id (`<accountId>-<messageId>`)
        id: String,

        /// Print the email as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Overwrite the category of one email
    Categorize {
        /// Email id (`<accountId>-<messageId>`)
        id: String,

        category: String,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .as_deref()
        .map(expand_home)
        .unwrap_or_else(get_config_path);

    match cli.command {
        Commands::Init => onboard::run(&config_path),
        Commands::Status => status::run(&load_config(Some(&config_path)), &config_path),
        Commands::Sync { logs, json } => {
            init_logging(if logs { "onebox=debug,info" } else { "onebox=info,warn" }, json);
            sync_cmd::run(load_config(Some(&config_path))).await
        }
        Commands::Search {
            query,
            account,
            folder,
            category,
            page,
            limit,
            json,
        } => {
            init_logging("warn", false);
            let args = query_cmd::SearchArgs {
                query,
                account,
                folder,
                category,
                page,
                limit,
                json,
            };
            query_cmd::search(&load_config(Some(&config_path)), args).await
        }
        Commands::Accounts => {
            init_logging("warn", false);
            query_cmd::accounts(&load_config(Some(&config_path))).await
        }
        Commands::Folders { account } => {
            init_logging("warn", false);
            query_cmd::folders(&load_config(Some(&config_path)), account).await
        }
        Commands::Show { id, json } => {
            init_logging("warn", false);
            query_cmd::show(&load_config(Some(&config_path)), &id, json).await
        }
        Commands::Categorize { id, category } => {
            init_logging("warn", false);
            query_cmd::categorize(&load_config(Some(&config_path)), &id, &category).await
        }
    }
}

/// Initialize tracing/logging. `RUST_LOG` wins over `default_filter`.
fn init_logging(default_filter: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
