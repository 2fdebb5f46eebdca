//! Cursor persistence — where each account left off.
//!
//! A session loads its cursor once at startup and saves it after every
//! backfill and after each catch-up batch. With a valid cursor, a restart
//! only fetches messages above `lastUid` instead of re-running the backfill.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use onebox_core::types::Cursor;

/// Storage for per-account cursors. Shared by every session.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, account_id: &str) -> anyhow::Result<Option<Cursor>>;

    async fn save(&self, account_id: &str, cursor: Cursor) -> anyhow::Result<()>;
}

// ─────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────

/// Cursors kept for the lifetime of the process only.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<String, Cursor>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, account_id: &str) -> anyhow::Result<Option<Cursor>> {
        Ok(self.cursors.lock().await.get(account_id).copied())
    }

    async fn save(&self, account_id: &str, cursor: Cursor) -> anyhow::Result<()> {
        self.cursors
            .lock()
            .await
            .insert(account_id.to_string(), cursor);
        Ok(())
    }
}

// ─────────────────────────────────────────────
// JSON file store
// ─────────────────────────────────────────────

/// All cursors in one pretty-printed JSON object keyed by account id.
///
/// The file is read on first access and rewritten on every save.
#[derive(Debug)]
pub struct JsonCursorStore {
    path: PathBuf,
    cache: Mutex<Option<HashMap<String, Cursor>>>,
}

impl JsonCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> anyhow::Result<HashMap<String, Cursor>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no cursor file, starting empty");
            return Ok(HashMap::new());
        }
        let data = tokio::fs::read_to_string(&self.path).await?;
        let cursors: HashMap<String, Cursor> = serde_json::from_str(&data)
            .map_err(|e| anyhow::anyhow!("failed to parse cursor store: {}", e))?;
        info!(
            path = %self.path.display(),
            accounts = cursors.len(),
            "loaded cursor store"
        );
        Ok(cursors)
    }
}

#[async_trait]
impl CursorStore for JsonCursorStore {
    async fn load(&self, account_id: &str) -> anyhow::Result<Option<Cursor>> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.read_file().await?);
        }
        Ok(cache
            .as_ref()
            .and_then(|cursors| cursors.get(account_id).copied()))
    }

    async fn save(&self, account_id: &str, cursor: Cursor) -> anyhow::Result<()> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.read_file().await?);
        }
        let cursors = cache.get_or_insert_with(HashMap::new);
        cursors.insert(account_id.to_string(), cursor);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&*cursors)?;
        // Write-then-rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(account = %account_id, last_uid = cursor.last_uid, "saved cursor");
        Ok(())
    }
}
