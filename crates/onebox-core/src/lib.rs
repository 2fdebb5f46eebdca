//! Onebox Core — types, errors, configuration, and shared helpers.
//!
//! This crate contains:
//! - **types**: `NormalizedEmail`, `ClassifiedEmail`, `Category`, and the
//!   mailbox transport types (`MessageRef`, `RawMessage`, `Cursor`)
//! - **error**: typed errors for each collaborator seam
//! - **config**: JSON config schema, loader, and env var overrides
//! - **utils**: path and string helpers

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use config::{AccountConfig, Config};
pub use error::{
    ClassificationError, ConfigError, IndexError, NotifyError, ParseError, TransportError,
};
pub use types::{Category, ClassifiedEmail, Cursor, MailboxInfo, MessageRef, NormalizedEmail, RawMessage};
