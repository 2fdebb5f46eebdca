//! `onebox init` — create the config file and data directory.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use onebox_core::config::{save_config, AccountConfig, Config};
use onebox_core::utils::get_data_path;

/// Run the init command against `path` (defaults to `~/.onebox/config.json`).
pub fn run(path: &Path) -> Result<()> {
    println!();
    println!("{}", "📬 Onebox Setup".cyan().bold());
    println!();

    let data_dir = get_data_path();
    std::fs::create_dir_all(&data_dir)?;
    println!("  {} data dir at {}", "✓".green(), data_dir.display());

    if init_at(path)? {
        println!("  {} created config at {}", "✓".green(), path.display());
        println!();
        println!(
            "{}",
            "  Fill in the account password and classifier API key, then run `onebox sync`.".green()
        );
    } else {
        println!("  {} config already exists at {}", "✓".green(), path.display());
    }
    println!();
    Ok(())
}

/// Write a starter config at `path` unless one exists. Returns whether it was created.
pub fn init_at(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    save_config(&template(), Some(path))?;
    Ok(true)
}

/// Defaults plus one placeholder account to fill in.
fn template() -> Config {
    Config {
        accounts: vec![AccountConfig {
            username: "you@example.com".into(),
            host: "imap.example.com".into(),
            ..AccountConfig::default()
        }],
        ..Config::default()
    }
}
