//! Error taxonomy shared by the sync engine and its collaborators.
//!
//! Each collaborator seam gets its own error type so the session and the
//! pipeline can decide per category what to do:
//!
//! | Error                 | Reaction                                   |
//! |-----------------------|--------------------------------------------|
//! | `TransportError`      | session reconnects with backoff            |
//! | `ParseError`          | message dropped, logged                    |
//! | `ClassificationError` | label falls back to `Uncategorized`        |
//! | `IndexError`          | logged at error level, pipeline continues  |
//! | `NotifyError`         | logged per sink, other sinks unaffected    |
//! | `ConfigError`         | offending account skipped                  |

use thiserror::Error;

/// Connection, authentication, fetch, or watch failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {host}:{port} failed: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("mailbox '{mailbox}' could not be opened: {reason}")]
    Mailbox { mailbox: String, reason: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by server")]
    Closed,

    #[error("operation timed out")]
    Timeout,
}

/// Raw message could not be turned into a `NormalizedEmail`.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("message {uid} is empty")]
    Empty { uid: u32 },

    #[error("message {uid} is malformed: {reason}")]
    Malformed { uid: u32, reason: String },
}

/// Classifier call failed or returned something outside the label set.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("classifier request failed: {0}")]
    Request(String),

    #[error("classifier returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("classifier returned unknown label '{0}'")]
    UnknownLabel(String),
}

/// Search index operation failed.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("search backend error: {0}")]
    Backend(String),

    #[error("document '{0}' not found")]
    NotFound(String),

    #[error("field '{0}' cannot be updated")]
    InvalidField(String),
}

/// A single notification sink failed to deliver.
#[derive(Debug, Error)]
#[error("notifier '{sink}' failed: {reason}")]
pub struct NotifyError {
    pub sink: String,
    pub reason: String,
}

impl NotifyError {
    pub fn new(sink: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            reason: reason.into(),
        }
    }
}

/// Invalid or incomplete configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("account '{account}' is missing required field '{field}'")]
    MissingField { account: String, field: &'static str },

    #[error("duplicate account id '{0}'")]
    DuplicateAccount(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
