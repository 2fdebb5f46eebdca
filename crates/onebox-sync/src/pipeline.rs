//! Ingestion pipeline — parse → classify → index → notify, one message at a time.
//!
//! Every stage failure is contained:
//! - parse errors drop the message
//! - classifier errors fall back to `Uncategorized`
//! - index errors are logged and the message still reaches the notify stage
//! - notifier errors are logged per sink
//!
//! A message never reaches the notify stage unless its label is `Interested`,
//! and each document id is announced at most once per process.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use onebox_core::types::{Category, ClassifiedEmail, RawMessage};
use onebox_core::utils::clip_chars;

use crate::traits::{Classifier, MessageParser, Notifier, SearchIndex};

// ─────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────

/// Maximum tracked notification ids. Past this the oldest ids are forgotten first.
pub const MAX_NOTIFIED_IDS: usize = 100_000;

// ─────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────

/// What happened to a message that made it past parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestReport {
    pub id: String,
    pub category: Category,
    /// Whether this invocation dispatched notifications.
    pub notified: bool,
}

/// Result of one pipeline invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Indexed(IngestReport),
    /// Classified (and possibly notified) but the index rejected the upsert.
    IndexFailed(IngestReport),
    /// Unparseable message; nothing was classified, indexed, or notified.
    Dropped { uid: u32, reason: String },
}

impl IngestOutcome {
    pub fn report(&self) -> Option<&IngestReport> {
        match self {
            IngestOutcome::Indexed(report) | IngestOutcome::IndexFailed(report) => Some(report),
            IngestOutcome::Dropped { .. } => None,
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, IngestOutcome::Indexed(_))
    }
}

// ─────────────────────────────────────────────
// IngestionPipeline
// ─────────────────────────────────────────────

/// Shared by every account session.
pub struct IngestionPipeline {
    parser: Arc<dyn MessageParser>,
    classifier: Arc<dyn Classifier>,
    index: Arc<dyn SearchIndex>,
    notifiers: Vec<Arc<dyn Notifier>>,
    /// Clip bodies to this many characters before classifying (0 = no limit).
    max_body_chars: usize,
    /// Ids already announced to the notifiers.
    notified: Mutex<NotifiedIds>,
}

impl IngestionPipeline {
    pub fn new(
        parser: Arc<dyn MessageParser>,
        classifier: Arc<dyn Classifier>,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        Self {
            parser,
            classifier,
            index,
            notifiers: Vec::new(),
            max_body_chars: 0,
            notified: Mutex::new(NotifiedIds::new(MAX_NOTIFIED_IDS)),
        }
    }

    /// Add a notification sink.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        info!(sink = %notifier.name(), "registered notifier");
        self.notifiers.push(notifier);
        self
    }

    pub fn with_max_body_chars(mut self, max_body_chars: usize) -> Self {
        self.max_body_chars = max_body_chars;
        self
    }

    pub fn notifier_names(&self) -> Vec<String> {
        self.notifiers.iter().map(|n| n.name().to_string()).collect()
    }

    /// Run one message through every stage.
    ///
    /// `raw` is consumed; the bytes are released as soon as parsing is done.
    pub async fn ingest(&self, account_id: &str, folder: &str, raw: RawMessage) -> IngestOutcome {
        let uid = raw.uid;

        // Parse
        let mut email = match self.parser.parse(account_id, folder, &raw) {
            Ok(email) => email,
            Err(e) => {
                warn!(account = %account_id, uid, error = %e, "dropping unparseable message");
                return IngestOutcome::Dropped {
                    uid,
                    reason: e.to_string(),
                };
            }
        };
        drop(raw);

        if self.max_body_chars > 0 {
            email.body = clip_chars(&email.body, self.max_body_chars);
        }

        // Classify
        let category = match self.classifier.classify(&email.subject, &email.body).await {
            Ok(category) => category,
            Err(e) => {
                warn!(
                    account = %account_id,
                    id = %email.id,
                    error = %e,
                    "classification failed, using Uncategorized"
                );
                Category::Uncategorized
            }
        };

        let record = ClassifiedEmail::new(email, category);
        let id = record.id().to_string();

        // Index
        let indexed = match self.index.upsert(&id, &record).await {
            Ok(()) => true,
            Err(e) => {
                error!(account = %account_id, id = %id, error = %e, "failed to index email");
                false
            }
        };

        // Notify
        let notified = self.notify(&record).await;

        debug!(
            account = %account_id,
            uid,
            id = %id,
            category = %category,
            indexed,
            notified,
            "ingested message"
        );

        let report = IngestReport {
            id,
            category,
            notified,
        };
        if indexed {
            IngestOutcome::Indexed(report)
        } else {
            IngestOutcome::IndexFailed(report)
        }
    }

    /// Ingest a batch with up to `concurrency` messages in flight.
    ///
    /// Outcomes are returned in completion order. Dropping the returned future
    /// stops every in-flight invocation.
    pub async fn ingest_all(
        &self,
        account_id: &str,
        folder: &str,
        raws: Vec<RawMessage>,
        concurrency: usize,
    ) -> Vec<IngestOutcome> {
        stream::iter(raws)
            .map(|raw| self.ingest(account_id, folder, raw))
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// Dispatch to every sink if the email is `Interested` and not yet announced.
    async fn notify(&self, record: &ClassifiedEmail) -> bool {
        if record.category != Category::Interested || self.notifiers.is_empty() {
            return false;
        }
        if !self.claim_notification(record.id()).await {
            debug!(id = %record.id(), "already notified, skipping");
            return false;
        }

        let results = join_all(self.notifiers.iter().map(|n| n.notify(record))).await;
        for (notifier, result) in self.notifiers.iter().zip(results) {
            match result {
                Ok(()) => info!(sink = %notifier.name(), id = %record.id(), "sent notification"),
                Err(e) => warn!(sink = %notifier.name(), id = %record.id(), error = %e, "notification failed"),
            }
        }
        true
    }

    /// Mark `id` as announced. Returns `false` if it already was.
    async fn claim_notification(&self, id: &str) -> bool {
        self.notified.lock().await.insert(id)
    }
}

/// Bounded set of announced ids with oldest-first eviction.
struct NotifiedIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl NotifiedIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns `false` if `id` is already tracked.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
