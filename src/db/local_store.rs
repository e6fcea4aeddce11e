use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::FocusSession;

/// The device-local session log the recorder writes to and the sync
/// transport reads from.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Persists a freshly opened session.
    async fn insert(&self, session: &FocusSession) -> Result<()>;

    /// Persists the one and only close of a session. Closed rows are never
    /// touched again.
    async fn update(&self, session: &FocusSession) -> Result<()>;

    /// Closed sessions with `start_time` strictly after `since` (all of them
    /// when `None`), oldest first, at most `limit`.
    async fn query_unsynced(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<FocusSession>>;

    /// Largest `start_time` of any stored session, open or closed.
    async fn latest_start(&self) -> Result<Option<DateTime<Utc>>>;

    /// Heartbeat for the open session, used to bound it after a crash.
    async fn mark_seen(&self, session_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Closes every session still marked active at its last heartbeat and
    /// returns them. Run before a recorder starts.
    async fn close_orphaned(&self) -> Result<Vec<FocusSession>>;

    async fn load_watermark(&self) -> Result<Option<DateTime<Utc>>>;

    async fn save_watermark(&self, watermark: DateTime<Utc>) -> Result<()>;
}
