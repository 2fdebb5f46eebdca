//! Collaborator traits — the seams between the sync engine and the outside world.
//!
//! The engine never talks to a mail server, a parser, a classifier, a search
//! backend, or a notification sink directly. It holds `Arc<dyn …>` trait
//! objects and the CLI wires concrete implementations in.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use onebox_core::config::AccountConfig;
use onebox_core::error::{ClassificationError, IndexError, NotifyError, ParseError, TransportError};
use onebox_core::types::{Category, ClassifiedEmail, MailboxInfo, MessageRef, NormalizedEmail, RawMessage};

// ─────────────────────────────────────────────
// Mailbox transport
// ─────────────────────────────────────────────

/// Why a watch returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// The server reported new activity (e.g. `* n EXISTS`).
    Activity,
}

/// Opens authenticated connections for an account.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    /// Connect and authenticate. The returned session has no mailbox selected.
    async fn connect(&self, account: &AccountConfig) -> Result<Box<dyn MailboxSession>, TransportError>;
}

/// One live, authenticated connection.
///
/// Owned by a single `AccountSession`; never shared between tasks.
#[async_trait]
pub trait MailboxSession: Send {
    /// Select the mailbox to synchronize.
    async fn open_mailbox(&mut self, name: &str) -> Result<MailboxInfo, TransportError>;

    /// Messages whose date is on or after `since`.
    async fn search_since(&mut self, since: DateTime<Utc>) -> Result<Vec<MessageRef>, TransportError>;

    /// Every message in the selected mailbox.
    async fn search_all(&mut self) -> Result<Vec<MessageRef>, TransportError>;

    /// Fetch full message bodies. Missing refs are silently skipped.
    async fn fetch(&mut self, refs: &[MessageRef]) -> Result<Vec<RawMessage>, TransportError>;

    /// Block until the server reports new activity.
    ///
    /// Must be cancel-safe: the session drops this future whenever a
    /// keepalive renewal or shutdown wins the race, and then calls
    /// `renew_watch()` or `close()` on the same connection.
    async fn watch(&mut self) -> Result<WatchEvent, TransportError>;

    /// Re-issue the watch request before the server's idle timeout.
    async fn renew_watch(&mut self) -> Result<(), TransportError>;

    /// Log out and drop the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

// ─────────────────────────────────────────────
// Pipeline stages
// ─────────────────────────────────────────────

/// Turns raw RFC 5322 bytes into a `NormalizedEmail`.
pub trait MessageParser: Send + Sync {
    fn parse(
        &self,
        account_id: &str,
        folder: &str,
        raw: &RawMessage,
    ) -> Result<NormalizedEmail, ParseError>;
}

/// Assigns one label from the closed `Category` set.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, subject: &str, body: &str) -> Result<Category, ClassificationError>;
}

/// A sink notified about `Interested` emails.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short sink name for logs (e.g. "slack").
    fn name(&self) -> &str;

    async fn notify(&self, email: &ClassifiedEmail) -> Result<(), NotifyError>;
}

// ─────────────────────────────────────────────
// Search index
// ─────────────────────────────────────────────

/// Keyword fields that can be filtered, aggregated, or updated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexField {
    AccountId,
    Folder,
    Category,
}

impl IndexField {
    /// Document key as stored in the index.
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexField::AccountId => "accountId",
            IndexField::Folder => "folder",
            IndexField::Category => "aiCategory",
        }
    }
}

impl fmt::Display for IndexField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query filters. All set filters must match.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchFilters {
    /// Free text matched against subject and body.
    pub text: Option<String>,
    pub account_id: Option<String>,
    pub folder: Option<String>,
    pub category: Option<Category>,
}

impl SearchFilters {
    pub fn for_account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: Some(account_id.into()),
            ..Self::default()
        }
    }
}

/// One page of results, newest first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchPage {
    pub total: usize,
    pub items: Vec<ClassifiedEmail>,
    pub page: usize,
    pub limit: usize,
}

/// Shared document store for classified emails.
///
/// Implementations must tolerate concurrent calls from every session;
/// `upsert` is atomic per document id.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or replace the document with this id.
    async fn upsert(&self, id: &str, record: &ClassifiedEmail) -> Result<(), IndexError>;

    async fn get(&self, id: &str) -> Result<Option<ClassifiedEmail>, IndexError>;

    /// `page` is 1-based.
    async fn query(
        &self,
        filters: &SearchFilters,
        page: usize,
        limit: usize,
    ) -> Result<SearchPage, IndexError>;

    /// Distinct values of a keyword field, optionally within a filter.
    async fn distinct_values(
        &self,
        field: IndexField,
        filter: Option<&SearchFilters>,
    ) -> Result<Vec<String>, IndexError>;

    /// Overwrite a single field (e.g. a manual category correction).
    async fn update_field(&self, id: &str, field: IndexField, value: &str) -> Result<(), IndexError>;
}
