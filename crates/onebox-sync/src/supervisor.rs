//! Sync Supervisor — owns one `AccountSession` per configured account.
//!
//! Responsibilities:
//! - Validate accounts and spawn a session task for each valid one
//! - Expose per-account state and a stream of lifecycle events
//! - Broadcast shutdown and wait (bounded) for every session to close
//!
//! Sessions never share a connection, and a failure in one account never
//! stops another.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use onebox_core::config::AccountConfig;
use onebox_core::error::ConfigError;

use crate::session::{AccountSession, SessionEvent, SessionState, SessionSummary, SyncContext};
use crate::shutdown::{shutdown_channel, ShutdownTrigger};

/// Buffered lifecycle events. Events beyond this are dropped, not queued.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct SessionHandle {
    state: watch::Receiver<SessionState>,
    join: JoinHandle<Option<SessionSummary>>,
}

/// Which accounts `start()` launched and which it skipped.
#[derive(Debug, Default)]
pub struct StartReport {
    pub started: Vec<String>,
    pub skipped: Vec<(String, ConfigError)>,
}

/// How each session ended during `shutdown()`.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Sessions that closed within the grace period.
    pub closed: Vec<SessionSummary>,
    /// Sessions whose task panicked.
    pub failed: Vec<String>,
    /// Sessions aborted after the grace period ran out.
    pub forced: Vec<String>,
}

// ─────────────────────────────────────────────
// SyncSupervisor
// ─────────────────────────────────────────────

pub struct SyncSupervisor {
    ctx: SyncContext,
    sessions: HashMap<String, SessionHandle>,
    shutdown: ShutdownTrigger,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
}

impl SyncSupervisor {
    pub fn new(ctx: SyncContext) -> Self {
        let (shutdown, _) = shutdown_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            ctx,
            sessions: HashMap::new(),
            shutdown,
            events_tx,
            events_rx,
        }
    }

    /// Start a session for every valid account.
    ///
    /// Invalid or duplicate accounts are logged and skipped; the rest start.
    pub fn start(&mut self, accounts: Vec<AccountConfig>) -> StartReport {
        let mut report = StartReport::default();
        for account in accounts {
            let label = if account.id().is_empty() {
                account.host.clone()
            } else {
                account.id().to_string()
            };
            match self.start_account(account) {
                Ok(id) => report.started.push(id),
                Err(e) => {
                    warn!(account = %label, error = %e, "skipping account");
                    report.skipped.push((label, e));
                }
            }
        }
        info!(
            started = report.started.len(),
            skipped = report.skipped.len(),
            "sync supervisor started"
        );
        report
    }

    /// Validate and start a single account. Returns its id.
    pub fn start_account(&mut self, account: AccountConfig) -> Result<String, ConfigError> {
        if self.shutdown.is_triggered() {
            return Err(ConfigError::Invalid("supervisor is shutting down".into()));
        }
        let account = account.resolve()?;
        let id = account.account_id.clone();
        if self.sessions.contains_key(&id) {
            return Err(ConfigError::DuplicateAccount(id));
        }

        let session = AccountSession::new(account, self.ctx.clone(), self.shutdown.signal())?
            .with_events(self.events_tx.clone());
        let state = session.subscribe_state();

        let events = self.events_tx.clone();
        let task_id = id.clone();
        let join = tokio::spawn(async move {
            match AssertUnwindSafe(session.run()).catch_unwind().await {
                Ok(summary) => Some(summary),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(account = %task_id, error = %message, "account session failed");
                    let _ = events.try_send(SessionEvent::Failed {
                        account_id: task_id,
                        error: message,
                    });
                    None
                }
            }
        });

        info!(account = %id, "account session spawned");
        self.sessions.insert(id.clone(), SessionHandle { state, join });
        Ok(id)
    }

    /// Ids of all started sessions, sorted.
    pub fn account_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Current state of every session.
    pub fn states(&self) -> HashMap<String, SessionState> {
        self.sessions
            .iter()
            .map(|(id, handle)| (id.clone(), *handle.state.borrow()))
            .collect()
    }

    pub fn state(&self, account_id: &str) -> Option<SessionState> {
        self.sessions
            .get(account_id)
            .map(|handle| *handle.state.borrow())
    }

    /// Watch one session's state transitions.
    pub fn subscribe_state(&self, account_id: &str) -> Option<watch::Receiver<SessionState>> {
        self.sessions
            .get(account_id)
            .map(|handle| handle.state.clone())
    }

    /// Next lifecycle event from any session.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Broadcast shutdown without waiting.
    pub fn signal_shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Signal every session to stop and wait up to `grace` for them to close.
    ///
    /// Sessions still running at the deadline are aborted. When this returns,
    /// no session task is running.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        info!(
            sessions = self.sessions.len(),
            grace_ms = grace.as_millis() as u64,
            "shutting down sync supervisor"
        );
        self.shutdown.trigger();

        let deadline = tokio::time::Instant::now() + grace;
        let mut report = ShutdownReport::default();

        for id in self.account_ids() {
            let Some(handle) = self.sessions.remove(&id) else {
                continue;
            };
            let mut join = handle.join;
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(Some(summary))) => report.closed.push(summary),
                Ok(Ok(None)) => report.failed.push(id),
                Ok(Err(e)) => {
                    error!(account = %id, error = %e, "session task did not complete");
                    report.failed.push(id);
                }
                Err(_) => {
                    warn!(account = %id, "session did not close within grace period, aborting");
                    join.abort();
                    let _ = join.await;
                    report.forced.push(id);
                }
            }
        }

        info!(
            closed = report.closed.len(),
            failed = report.failed.len(),
            forced = report.forced.len(),
            "sync supervisor stopped"
        );
        report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "session panicked".to_string()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
