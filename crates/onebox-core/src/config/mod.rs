//! Configuration system — schema, loading, and env var overrides.
//!
//! # Usage
//! ```no_run
//! use onebox_core::config;
//!
//! let cfg = config::load_config(None);
//! println!("Accounts: {}", cfg.accounts.len());
//! ```

pub mod loader;
pub mod schema;

// Re-export key types
pub use loader::{get_config_path, load_config, save_config};
pub use schema::{
    AccountConfig, ClassifierConfig, Config, NotificationsConfig, SearchBackend, SearchConfig,
    SyncConfig,
};
