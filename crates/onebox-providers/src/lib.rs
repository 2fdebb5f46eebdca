//! Concrete collaborators for the Onebox sync engine.
//!
//! # Architecture
//!
//! - [`imap::ImapConnector`] — IMAP/IMAPS client with `IDLE` based watch
//! - [`parser::MailParser`] — RFC 5322 parsing on `mailparse`
//! - [`classifier::LlmClassifier`] — OpenAI-compatible chat completions labeller
//! - [`index`] — in-memory and Elasticsearch search indexes
//! - [`notify`] — Slack and generic webhook sinks
//!
//! Everything here implements a trait from `onebox_sync::traits`; the engine
//! never depends on this crate directly.

pub mod classifier;
pub mod imap;
pub mod index;
pub mod notify;
pub mod parser;

pub use classifier::{LlmClassifier, NoopClassifier};
pub use imap::ImapConnector;
pub use index::{ElasticsearchIndex, MemoryIndex};
pub use notify::{SlackNotifier, WebhookNotifier};
pub use parser::MailParser;
