//! Onebox Sync — the multi-account mailbox synchronization engine.
//!
//! This crate contains:
//! - **traits**: collaborator seams (`MailboxConnector`, `MessageParser`,
//!   `Classifier`, `SearchIndex`, `Notifier`)
//! - **backoff** / **keepalive**: reconnect delays and watch renewal timing
//! - **pipeline**: parse → classify → index → notify for one message
//! - **cursor**: per-account resume positions
//! - **session**: the per-account state machine
//! - **supervisor**: lifecycle of every session
//!
//! Concrete IMAP, parser, classifier, index, and notifier implementations
//! live in `onebox-providers`.

pub mod backoff;
pub mod cursor;
pub mod keepalive;
pub mod pipeline;
pub mod session;
pub mod shutdown;
pub mod supervisor;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::BackoffPolicy;
pub use cursor::{CursorStore, JsonCursorStore, MemoryCursorStore};
pub use keepalive::KeepaliveScheduler;
pub use pipeline::{IngestOutcome, IngestReport, IngestionPipeline};
pub use session::{AccountSession, SessionEvent, SessionSettings, SessionState, SessionSummary, SyncContext};
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use supervisor::{ShutdownReport, StartReport, SyncSupervisor};
pub use traits::{
    Classifier, IndexField, MailboxConnector, MailboxSession, MessageParser, Notifier,
    SearchFilters, SearchIndex, SearchPage, WatchEvent,
};
