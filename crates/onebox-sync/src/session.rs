//! Account session — one mailbox, one connection, one state machine.
//!
//! ```text
//! Disconnected → Connecting ─ok→ Backfilling ─→ Watching ⇄ Refreshing
//!                    ↑ │err                         │ err
//!                    │ ↓                            ↓
//!                  Reconnecting ←───────────────────┘
//! ```
//!
//! - With no usable cursor the session backfills the configured window, then
//!   watches. With a cursor it fetches everything above `lastUid` and watches.
//! - Every transport error moves to `Reconnecting` and waits out the backoff.
//! - Shutdown is observed in every state and ends in `Disconnected`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use onebox_core::config::{AccountConfig, SyncConfig};
use onebox_core::error::{ConfigError, TransportError};
use onebox_core::types::{Cursor, MailboxInfo, MessageRef, RawMessage};

use crate::backoff::BackoffPolicy;
use crate::cursor::CursorStore;
use crate::keepalive::KeepaliveScheduler;
use crate::pipeline::{IngestOutcome, IngestionPipeline};
use crate::shutdown::ShutdownSignal;
use crate::traits::{MailboxConnector, MailboxSession, WatchEvent};

// ─────────────────────────────────────────────
// State & events
// ─────────────────────────────────────────────

/// Observable lifecycle state of one account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Backfilling,
    Watching,
    Refreshing,
    Reconnecting,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Backfilling => "backfilling",
            SessionState::Watching => "watching",
            SessionState::Refreshing => "refreshing",
            SessionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle signal published to the supervisor.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Started {
        account_id: String,
    },
    StateChanged {
        account_id: String,
        state: SessionState,
    },
    Reconnecting {
        account_id: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Closed {
        account_id: String,
    },
    /// The session task ended abnormally.
    Failed {
        account_id: String,
        error: String,
    },
}

// ─────────────────────────────────────────────
// Settings & shared context
// ─────────────────────────────────────────────

/// Per-session tuning, derived from `SyncConfig`.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    pub backfill_days: u32,
    pub fetch_batch_size: usize,
    pub pipeline_concurrency: usize,
    pub backoff: BackoffPolicy,
    pub keepalive_interval: Duration,
    pub server_idle_timeout: Duration,
    /// Upper bound on the logout exchange during shutdown.
    pub close_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl SessionSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            backfill_days: config.backfill_days,
            fetch_batch_size: config.fetch_batch_size.max(1),
            pipeline_concurrency: config.pipeline_concurrency.max(1),
            backoff: BackoffPolicy::from_config(config),
            keepalive_interval: config.keepalive_interval(),
            server_idle_timeout: config.server_idle_timeout(),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SyncContext {
    pub connector: Arc<dyn MailboxConnector>,
    pub pipeline: Arc<IngestionPipeline>,
    pub cursors: Arc<dyn CursorStore>,
    pub settings: SessionSettings,
}

/// Counters reported when a session ends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub account_id: String,
    pub connects: u32,
    pub reconnects: u32,
    pub ingested: u64,
    pub dropped: u64,
}

/// Why the connected phase ended.
enum SessionExit {
    Shutdown,
    Transport(TransportError),
}

/// What woke the watching loop.
enum Wake {
    Shutdown,
    Renew,
    Activity,
    Failed(TransportError),
}

// ─────────────────────────────────────────────
// AccountSession
// ─────────────────────────────────────────────

/// Drives one account from connect to shutdown.
pub struct AccountSession {
    account: AccountConfig,
    account_id: String,
    ctx: SyncContext,
    shutdown: ShutdownSignal,
    keepalive: KeepaliveScheduler,
    state_tx: watch::Sender<SessionState>,
    events: Option<mpsc::Sender<SessionEvent>>,
    cursor: Option<Cursor>,
    /// Consecutive failed attempts since the last successful connect.
    attempts: u32,
    started_at: DateTime<Utc>,
    connects: u32,
    reconnects: u32,
    ingested: AtomicU64,
    dropped: AtomicU64,
}

impl AccountSession {
    /// Fails if the keepalive interval is not shorter than the server timeout.
    pub fn new(
        account: AccountConfig,
        ctx: SyncContext,
        shutdown: ShutdownSignal,
    ) -> Result<Self, ConfigError> {
        let keepalive = KeepaliveScheduler::new(
            ctx.settings.keepalive_interval,
            ctx.settings.server_idle_timeout,
        )?;
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Ok(Self {
            account_id: account.id().to_string(),
            account,
            ctx,
            shutdown,
            keepalive,
            state_tx,
            events: None,
            cursor: None,
            attempts: 0,
            started_at: Utc::now(),
            connects: 0,
            reconnects: 0,
            ingested: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Publish lifecycle events to `events`.
    pub fn with_events(mut self, events: mpsc::Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Run until shutdown. Never returns early on transport errors.
    pub async fn run(mut self) -> SessionSummary {
        info!(
            account = %self.account_id,
            host = %self.account.host,
            mailbox = %self.account.mailbox,
            "account session started"
        );
        self.emit(SessionEvent::Started {
            account_id: self.account_id.clone(),
        });

        match self.ctx.cursors.load(&self.account_id).await {
            Ok(Some(cursor)) => {
                debug!(account = %self.account_id, last_uid = cursor.last_uid, "loaded cursor");
                self.cursor = Some(cursor);
            }
            Ok(None) => {}
            Err(e) => warn!(account = %self.account_id, error = %e, "failed to load cursor, will backfill"),
        }

        loop {
            if self.shutdown.is_triggered() {
                break;
            }
            self.set_state(SessionState::Connecting);

            let connected = tokio::select! {
                biased;
                _ = self.shutdown.wait() => None,
                result = self.connect() => Some(result),
            };
            let (mut client, info) = match connected {
                None => break,
                Some(Ok(pair)) => pair,
                Some(Err(e)) => {
                    if !self.back_off(&e).await {
                        break;
                    }
                    continue;
                }
            };

            self.connects += 1;
            self.attempts = 0;
            info!(
                account = %self.account_id,
                exists = info.exists,
                uid_validity = ?info.uid_validity,
                "mailbox opened"
            );

            match self.sync(client.as_mut(), info).await {
                SessionExit::Shutdown => {
                    self.close(client).await;
                    break;
                }
                SessionExit::Transport(e) => {
                    drop(client);
                    if !self.back_off(&e).await {
                        break;
                    }
                }
            }
        }

        self.set_state(SessionState::Disconnected);
        info!(account = %self.account_id, "account session closed");
        self.emit(SessionEvent::Closed {
            account_id: self.account_id.clone(),
        });
        self.summary()
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            account_id: self.account_id.clone(),
            connects: self.connects,
            reconnects: self.reconnects,
            ingested: self.ingested.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    // ─────────────────────────────────────────
    // Connection
    // ─────────────────────────────────────────

    async fn connect(&self) -> Result<(Box<dyn MailboxSession>, MailboxInfo), TransportError> {
        debug!(account = %self.account_id, host = %self.account.host, port = self.account.port, "connecting");
        let mut client = self.ctx.connector.connect(&self.account).await?;
        let info = client.open_mailbox(&self.account.mailbox).await?;
        Ok((client, info))
    }

    /// Sleep out the backoff for the next attempt. Returns `false` on shutdown.
    async fn back_off(&mut self, error: &TransportError) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        self.reconnects += 1;
        let delay = self.ctx.settings.backoff.next_delay(self.attempts);

        self.set_state(SessionState::Reconnecting);
        warn!(
            account = %self.account_id,
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "transport error, reconnecting"
        );
        self.emit(SessionEvent::Reconnecting {
            account_id: self.account_id.clone(),
            attempt: self.attempts,
            delay,
            error: error.to_string(),
        });

        tokio::select! {
            biased;
            _ = self.shutdown.wait() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn close(&self, mut client: Box<dyn MailboxSession>) {
        match tokio::time::timeout(self.ctx.settings.close_timeout, client.close()).await {
            Ok(Ok(())) => debug!(account = %self.account_id, "logged out"),
            Ok(Err(e)) => debug!(account = %self.account_id, error = %e, "logout failed"),
            Err(_) => debug!(account = %self.account_id, "logout timed out"),
        }
    }

    // ─────────────────────────────────────────
    // Connected phase
    // ─────────────────────────────────────────

    async fn sync(&mut self, client: &mut dyn MailboxSession, info: MailboxInfo) -> SessionExit {
        if let Some(cursor) = self.cursor {
            if !cursor.is_valid_for(&info) {
                warn!(
                    account = %self.account_id,
                    stored = ?cursor.uid_validity,
                    current = ?info.uid_validity,
                    "UIDVALIDITY changed, discarding cursor"
                );
                self.cursor = None;
            }
        }

        let mut cursor = match self.cursor {
            Some(cursor) => cursor,
            None => {
                self.set_state(SessionState::Backfilling);
                let result = tokio::select! {
                    biased;
                    _ = self.shutdown.wait() => None,
                    result = self.backfill(&mut *client, &info) => Some(result),
                };
                match result {
                    None => return SessionExit::Shutdown,
                    Some(Err(e)) => return SessionExit::Transport(e),
                    Some(Ok(cursor)) => {
                        self.commit_cursor(cursor).await;
                        cursor
                    }
                }
            }
        };

        // Anything that arrived while disconnected or during the backfill.
        if let Err(exit) = self.catch_up(&mut *client, &mut cursor).await {
            return exit;
        }

        self.set_state(SessionState::Watching);
        self.keepalive.reset();

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.shutdown.wait() => Wake::Shutdown,
                _ = self.keepalive.tick() => Wake::Renew,
                result = client.watch() => match result {
                    Ok(WatchEvent::Activity) => Wake::Activity,
                    Err(e) => Wake::Failed(e),
                },
            };

            match wake {
                Wake::Shutdown => return SessionExit::Shutdown,
                Wake::Failed(e) => return SessionExit::Transport(e),
                Wake::Renew => {
                    self.set_state(SessionState::Refreshing);
                    debug!(account = %self.account_id, "renewing watch");
                    let result = tokio::select! {
                        biased;
                        _ = self.shutdown.wait() => None,
                        result = client.renew_watch() => Some(result),
                    };
                    match result {
                        None => return SessionExit::Shutdown,
                        Some(Err(e)) => return SessionExit::Transport(e),
                        Some(Ok(())) => self.set_state(SessionState::Watching),
                    }
                }
                Wake::Activity => {
                    debug!(account = %self.account_id, "mailbox activity");
                    if let Err(exit) = self.catch_up(&mut *client, &mut cursor).await {
                        return exit;
                    }
                    self.keepalive.reset();
                }
            }
        }
    }

    /// Ingest the backfill window. Returns the cursor to resume from.
    async fn backfill(
        &self,
        client: &mut dyn MailboxSession,
        info: &MailboxInfo,
    ) -> Result<Cursor, TransportError> {
        let since = self.started_at - chrono::Duration::days(i64::from(self.ctx.settings.backfill_days));

        let highest = client
            .search_all()
            .await?
            .into_iter()
            .map(|r| r.uid())
            .max()
            .unwrap_or(0);
        let mut refs = client.search_since(since).await?;
        refs.sort_unstable();
        refs.dedup();

        info!(
            account = %self.account_id,
            since = %since.format("%Y-%m-%d"),
            messages = refs.len(),
            "backfilling"
        );

        for chunk in refs.chunks(self.ctx.settings.fetch_batch_size) {
            let raws = client.fetch(chunk).await?;
            let outcomes = self
                .ctx
                .pipeline
                .ingest_all(
                    &self.account_id,
                    &self.account.mailbox,
                    raws,
                    self.ctx.settings.pipeline_concurrency,
                )
                .await;
            for outcome in &outcomes {
                self.record(outcome);
            }
        }

        let last_uid = refs.last().map(|r| r.uid()).unwrap_or(0).max(highest);
        info!(account = %self.account_id, last_uid, "backfill complete");
        Ok(Cursor::new(info.uid_validity, last_uid))
    }

    /// Fetch everything above the cursor, racing shutdown, and persist progress.
    async fn catch_up(
        &mut self,
        client: &mut dyn MailboxSession,
        cursor: &mut Cursor,
    ) -> Result<(), SessionExit> {
        let before = *cursor;
        let result = tokio::select! {
            biased;
            _ = self.shutdown.wait() => None,
            result = self.ingest_new(client, &mut *cursor) => Some(result),
        };
        if *cursor != before {
            self.commit_cursor(*cursor).await;
        }
        match result {
            None => Err(SessionExit::Shutdown),
            Some(Err(e)) => Err(SessionExit::Transport(e)),
            Some(Ok(())) => Ok(()),
        }
    }

    /// Process new messages one at a time in ascending UID order,
    /// advancing `cursor` after each.
    async fn ingest_new(
        &self,
        client: &mut dyn MailboxSession,
        cursor: &mut Cursor,
    ) -> Result<(), TransportError> {
        let mut refs: Vec<MessageRef> = client
            .search_all()
            .await?
            .into_iter()
            .filter(|r| r.uid() > cursor.last_uid)
            .collect();
        if refs.is_empty() {
            return Ok(());
        }
        refs.sort_unstable();
        refs.dedup();
        debug!(
            account = %self.account_id,
            after = cursor.last_uid,
            messages = refs.len(),
            "fetching new messages"
        );

        for chunk in refs.chunks(self.ctx.settings.fetch_batch_size) {
            let mut raws: Vec<RawMessage> = client.fetch(chunk).await?;
            raws.sort_by_key(|r| r.uid);
            for raw in raws {
                let uid = raw.uid;
                let outcome = self
                    .ctx
                    .pipeline
                    .ingest(&self.account_id, &self.account.mailbox, raw)
                    .await;
                self.record(&outcome);
                cursor.last_uid = cursor.last_uid.max(uid);
            }
            // Refs the server no longer returns are skipped, not retried.
            if let Some(last) = chunk.last() {
                cursor.last_uid = cursor.last_uid.max(last.uid());
            }
        }
        Ok(())
    }

    async fn commit_cursor(&mut self, cursor: Cursor) {
        self.cursor = Some(cursor);
        if let Err(e) = self.ctx.cursors.save(&self.account_id, cursor).await {
            warn!(account = %self.account_id, error = %e, "failed to persist cursor");
        }
    }

    // ─────────────────────────────────────────
    // Bookkeeping
    // ─────────────────────────────────────────

    fn record(&self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Indexed(_) | IngestOutcome::IndexFailed(_) => self.ingested.fetch_add(1, Ordering::Relaxed),
            IngestOutcome::Dropped { .. } => self.dropped.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn set_state(&self, state: SessionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!(account = %self.account_id, state = %state, "session state");
            self.emit(SessionEvent::StateChanged {
                account_id: self.account_id.clone(),
                state,
            });
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            if events.try_send(event).is_err() {
                debug!(account = %self.account_id, "lifecycle event dropped");
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::MemoryCursorStore;
    use crate::shutdown::{shutdown_channel, ShutdownTrigger};
    use crate::testing::{
        account, FakeClassifier, FakeConnector, FakeMailbox, FakeParser, RecordingIndex,
        RecordingNotifier,
    };
    use onebox_core::types::Category;
    use tokio::task::JoinHandle;

    struct Harness {
        mailbox: Arc<FakeMailbox>,
        index: Arc<RecordingIndex>,
        notifier: Arc<RecordingNotifier>,
        cursors: Arc<MemoryCursorStore>,
        ctx: SyncContext,
    }

    struct Running {
        trigger: ShutdownTrigger,
        state: watch::Receiver<SessionState>,
        events: mpsc::Receiver<SessionEvent>,
        join: JoinHandle<SessionSummary>,
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            backoff: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(300)),
            close_timeout: Duration::from_secs(1),
            ..SessionSettings::default()
        }
    }

    fn harness(settings: SessionSettings) -> Harness {
        let mailbox = FakeMailbox::new();
        let index = RecordingIndex::new();
        let notifier = RecordingNotifier::new("slack");
        let cursors = Arc::new(MemoryCursorStore::new());
        let pipeline = IngestionPipeline::new(Arc::new(FakeParser), FakeClassifier::new(), index.clone())
            .with_notifier(notifier.clone());
        let ctx = SyncContext {
            connector: FakeConnector::new(mailbox.clone()),
            pipeline: Arc::new(pipeline),
            cursors: cursors.clone(),
            settings,
        };
        Harness {
            mailbox,
            index,
            notifier,
            cursors,
            ctx,
        }
    }

    fn spawn(h: &Harness, id: &str) -> Running {
        let (trigger, signal) = shutdown_channel();
        let (tx, events) = mpsc::channel(256);
        let session = AccountSession::new(account(id), h.ctx.clone(), signal)
            .unwrap()
            .with_events(tx);
        let state = session.subscribe_state();
        let join = tokio::spawn(session.run());
        Running {
            trigger,
            state,
            events,
            join,
        }
    }

    async fn wait_for_state(rx: &mut watch::Receiver<SessionState>, state: SessionState) {
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
            .await
            .expect("timed out waiting for state")
            .expect("session dropped its state channel");
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..2000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn drain(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(e) = events.try_recv() {
            out.push(e);
        }
        out
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::days(days)
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Watching.to_string(), "watching");
        assert_eq!(SessionState::Reconnecting.as_str(), "reconnecting");
    }

    #[test]
    fn test_new_rejects_keepalive_not_below_timeout() {
        let mut s = settings();
        s.keepalive_interval = Duration::from_secs(1800);
        s.server_idle_timeout = Duration::from_secs(1800);
        let h = harness(s);
        let (_trigger, signal) = shutdown_channel();
        assert!(AccountSession::new(account("a@x.com"), h.ctx.clone(), signal).is_err());
    }

    #[tokio::test]
    async fn test_backfill_indexes_window_and_notifies_interested() {
        let h = harness(settings());
        h.mailbox.add("<m1@x>", days_ago(2), "Quick question", "hi");
        h.mailbox.add("<m2@x>", days_ago(1), "I'm interested", "let's talk");
        h.mailbox.add("<m3@x>", days_ago(0), "Not for us", "no thanks");

        let mut run = spawn(&h, "a@x.com");
        wait_for_state(&mut run.state, SessionState::Watching).await;

        assert_eq!(
            h.index.ids(),
            vec!["a@x.com-m1@x", "a@x.com-m2@x", "a@x.com-m3@x"]
        );
        assert_eq!(h.index.doc("a@x.com-m2@x").unwrap().category, Category::Interested);
        assert_eq!(h.notifier.sent_ids(), vec!["a@x.com-m2@x".to_string()]);

        run.trigger.trigger();
        let summary = run.join.await.unwrap();
        assert_eq!(summary.ingested, 3);
        assert_eq!(summary.connects, 1);
        assert_eq!(*run.state.borrow(), SessionState::Disconnected);
        assert_eq!(h.mailbox.closes.load(Ordering::SeqCst), 1);

        let events = drain(&mut run.events);
        assert!(matches!(events.first(), Some(SessionEvent::Started { .. })));
        assert!(matches!(events.last(), Some(SessionEvent::Closed { .. })));
    }

    #[tokio::test]
    async fn test_backfill_skips_messages_outside_window() {
        let h = harness(settings());
        let old = h.mailbox.add("<old@x>", days_ago(40), "Old", "");
        let recent = h.mailbox.add("<new@x>", days_ago(3), "Recent", "");

        let mut run = spawn(&h, "a@x.com");
        wait_for_state(&mut run.state, SessionState::Watching).await;

        assert_eq!(h.index.ids(), vec!["a@x.com-new@x"]);
        assert_eq!(h.mailbox.fetched_uids(), vec![recent]);
        // The cursor still covers the old message so it is never fetched later.
        let cursor = h.cursors.load("a@x.com").await.unwrap().unwrap();
        assert_eq!(cursor.last_uid, recent.max(old));
        assert_eq!(cursor.uid_validity, Some(1));

        run.trigger.trigger();
        run.join.await.unwrap();
    }

    #[tokio::test]
    async fn test_new_message_processed_while_watching() {
        let h = harness(settings());
        h.mailbox.add("<m1@x>", days_ago(1), "Hello", "");

        let mut run = spawn(&h, "a@x.com");
        wait_for_state(&mut run.state, SessionState::Watching).await;

        let uid = h.mailbox.deliver("<m2@x>", "Interested in a demo", "");
        let index = h.index.clone();
        wait_until(move || index.len() == 2).await;
        let cursors = h.cursors.clone();
        wait_until(move || {
            futures_util::FutureExt::now_or_never(cursors.load("a@x.com"))
                .and_then(|r| r.ok().flatten())
                .is_some_and(|c| c.last_uid == uid)
        })
        .await;

        assert_eq!(h.notifier.sent_ids(), vec!["a@x.com-m2@x".to_string()]);
        assert_eq!(h.mailbox.fetched_uids(), vec![1, uid]);

        run.trigger.trigger();
        run.join.await.unwrap();
    }

    #[tokio::test]
    async fn test_backfill_then_live_delivery_indexes_three() {
        let h = harness(settings());
        h.mailbox.add("<old@x>", days_ago(45), "Old thread", "");
        h.mailbox.add("<m1@x>", days_ago(10), "Quick question", "hi");
        h.mailbox.add("<m2@x>", days_ago(2), "Following up", "ping");

        let mut run = spawn(&h, "a@x.com");
        wait_for_state(&mut run.state, SessionState::Watching).await;
        assert_eq!(h.index.ids(), vec!["a@x.com-m1@x", "a@x.com-m2@x"]);

        h.mailbox.deliver("<m3@x>", "Re: pricing", "");
        let index = h.index.clone();
        wait_until(move || index.len() == 3).await;

        assert_eq!(
            h.index.ids(),
            vec!["a@x.com-m1@x", "a@x.com-m2@x", "a@x.com-m3@x"]
        );
        assert!(h.index.doc("a@x.com-old@x").is_none());

        run.trigger.trigger();
        run.join.await.unwrap();
        assert_eq!(h.index.len(), 3);
    }

    #[tokio::test]
    async fn test_resumes_from_cursor_without_backfill() {
        let h = harness(settings());
        h.mailbox.add("<m1@x>", days_ago(1), "one", "");
        h.mailbox.add("<m2@x>", days_ago(1), "two", "");
        let fresh = h.mailbox.add("<m3@x>", days_ago(0), "three", "");
        h.cursors
            .save("a@x.com", Cursor::new(Some(1), 2))
            .await
            .unwrap();

        let mut run = spawn(&h, "a@x.com");
        wait_for_state(&mut run.state, SessionState::Watching).await;

        assert_eq!(h.mailbox.fetched_uids(), vec![fresh]);
        assert_eq!(h.index.ids(), vec!["a@x.com-m3@x"]);
        let events = drain(&mut run.events);
        assert!(!events.iter().any(|e| matches!(
            e,
            SessionEvent::StateChanged { state: SessionState::Backfilling, .. }
        )));

        run.trigger.trigger();
        run.join.await.unwrap();
    }

    #[tokio::test]
    async fn test_uid_validity_change_forces_backfill() {
        let h = harness(settings());
        h.mailbox.set_uid_validity(2);
        h.mailbox.add("<m1@x>", days_ago(1), "one", "");
        h.mailbox.add("<m2@x>", days_ago(1), "two", "");
        h.cursors
            .save("a@x.com", Cursor::new(Some(1), 50))
            .await
            .unwrap();

        let mut run = spawn(&h, "a@x.com");
        wait_for_state(&mut run.state, SessionState::Watching).await;

        assert_eq!(h.index.len(), 2);
        let cursor = h.cursors.load("a@x.com").await.unwrap().unwrap();
        assert_eq!(cursor, Cursor::new(Some(2), 2));

        run.trigger.trigger();
        run.join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_back_off_exponentially() {
        let h = harness(settings());
        h.mailbox.connect_failures.store(3, Ordering::SeqCst);

        let mut run = spawn(&h, "a@x.com");
        wait_for_state(&mut run.state, SessionState::Watching).await;

        let delays: Vec<(u32, Duration)> = drain(&mut run.events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Reconnecting { attempt, delay, .. } => Some((attempt, delay)),
                _ => None,
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                (1, Duration::from_secs(1)),
                (2, Duration::from_secs(2)),
                (3, Duration::from_secs(4)),
            ]
        );
        assert_eq!(h.mailbox.connects.load(Ordering::SeqCst), 4);

        run.trigger.trigger();
        let summary = run.join.await.unwrap();
        assert_eq!(summary.connects, 1);
        assert_eq!(summary.reconnects, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_error_reconnects_and_resets_attempts() {
        let h = harness(settings());
        h.mailbox.add("<m1@x>", days_ago(1), "one", "");
        h.mailbox.fail_next_watch.store(true, Ordering::SeqCst);

        let mut run = spawn(&h, "a@x.com");
        let mailbox = h.mailbox.clone();
        wait_until(move || mailbox.connects.load(Ordering::SeqCst) == 2).await;
        wait_for_state(&mut run.state, SessionState::Watching).await;

        // Second connection resumes from the cursor instead of re-fetching.
        assert_eq!(h.mailbox.fetched_uids(), vec![1]);

        // The next failure starts again from the first backoff step.
        h.mailbox.fail_next_watch.store(true, Ordering::SeqCst);
        h.mailbox.deliver("<m2@x>", "two", "");
        let mailbox = h.mailbox.clone();
        wait_until(move || mailbox.connects.load(Ordering::SeqCst) == 3).await;

        let attempts: Vec<(u32, Duration)> = drain(&mut run.events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Reconnecting { attempt, delay, .. } => Some((attempt, delay)),
                _ => None,
            })
            .collect();
        assert_eq!(
            attempts,
            vec![(1, Duration::from_secs(1)), (1, Duration::from_secs(1))]
        );

        run.trigger.trigger();
        run.join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_renews_before_server_timeout() {
        let mut s = settings();
        s.keepalive_interval = Duration::from_secs(10);
        s.server_idle_timeout = Duration::from_secs(20);
        let h = harness(s);

        let mut run = spawn(&h, "a@x.com");
        wait_for_state(&mut run.state, SessionState::Watching).await;

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(h.mailbox.renewals.load(Ordering::SeqCst), 3);
        assert_eq!(h.mailbox.connects.load(Ordering::SeqCst), 1);
        let events = drain(&mut run.events);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::StateChanged { state: SessionState::Refreshing, .. }
        )));
        assert_eq!(*run.state.borrow(), SessionState::Watching);

        run.trigger.trigger();
        run.join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_failure_reconnects() {
        let mut s = settings();
        s.keepalive_interval = Duration::from_secs(10);
        s.server_idle_timeout = Duration::from_secs(20);
        let h = harness(s);
        h.mailbox.fail_renewal.store(true, Ordering::SeqCst);

        let mut run = spawn(&h, "a@x.com");
        wait_for_state(&mut run.state, SessionState::Watching).await;

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(h.mailbox.renewals.load(Ordering::SeqCst), 1);
        assert_eq!(h.mailbox.connects.load(Ordering::SeqCst), 2);

        run.trigger.trigger();
        let summary = run.join.await.unwrap();
        assert_eq!(summary.reconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backfill_stops_work() {
        let mut s = settings();
        s.fetch_batch_size = 5;
        let h = harness(s);
        for i in 0..20 {
            h.mailbox.add(&format!("<m{i}@x>"), days_ago(1), "hello", "");
        }
        h.mailbox.set_fetch_delay(Duration::from_secs(10));

        let mut run = spawn(&h, "a@x.com");
        wait_for_state(&mut run.state, SessionState::Backfilling).await;
        run.trigger.trigger();

        let summary = tokio::time::timeout(Duration::from_secs(5), run.join)
            .await
            .expect("session should stop promptly")
            .unwrap();

        assert!(h.mailbox.fetch_calls.load(Ordering::SeqCst) <= 1);
        assert_eq!(h.index.len(), 0);
        assert_eq!(summary.ingested, 0);
        assert_eq!(h.mailbox.closes.load(Ordering::SeqCst), 1);
        assert_eq!(*run.state.borrow(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_reconnecting() {
        let h = harness(settings());
        h.mailbox.connect_failures.store(u32::MAX, Ordering::SeqCst);

        let mut run = spawn(&h, "a@x.com");
        wait_for_state(&mut run.state, SessionState::Reconnecting).await;
        run.trigger.trigger();

        let summary = tokio::time::timeout(Duration::from_secs(1), run.join)
            .await
            .expect("shutdown interrupts backoff")
            .unwrap();
        assert_eq!(summary.connects, 0);
        assert_eq!(*run.state.borrow(), SessionState::Disconnected);
        assert_eq!(h.mailbox.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unparseable_message_counted_as_dropped() {
        let h = harness(settings());
        h.mailbox.add_raw(days_ago(1), b"garbage");
        h.mailbox.add("<ok@x>", days_ago(1), "fine", "");

        let mut run = spawn(&h, "a@x.com");
        wait_for_state(&mut run.state, SessionState::Watching).await;
        run.trigger.trigger();
        let summary = run.join.await.unwrap();

        assert_eq!(summary.ingested, 1);
        assert_eq!(summary.dropped, 1);
        assert_eq!(h.index.ids(), vec!["a@x.com-ok@x"]);
    }
}
