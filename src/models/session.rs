//! Focus session data model.
//!
//! A `FocusSession` is one contiguous interval of foreground attention on a
//! single app/window/URL. The recorder opens it, closes it exactly once, and
//! from then on it is append-only in both the local and the durable store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::ContextSnapshot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SessionStatus {
    Active,
    #[default]
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "Active",
            SessionStatus::Closed => "Closed",
        }
    }
}

/// Display name plus an optional stable package identifier (bundle id,
/// executable path, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AppIdentity {
    #[serde(rename = "appName")]
    pub name: String,
    #[serde(rename = "packageId", default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
}

impl AppIdentity {
    pub fn new(name: impl Into<String>, package_id: Option<&str>) -> Self {
        Self {
            name: name.into(),
            package_id: package_id.map(String::from),
        }
    }

    /// Two identities name the same app when their package ids match, or,
    /// if either side has none, when their display names match.
    pub fn same_app(&self, other: &AppIdentity) -> bool {
        match (&self.package_id, &other.package_id) {
            (Some(a), Some(b)) => a == b,
            _ => self.name == other.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FocusSession {
    pub id: String,
    #[serde(flatten)]
    pub app: AppIdentity,
    pub window_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_path: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Milliseconds; `end_time - start_time` once closed, 0 while active.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub is_full_screen: bool,
    pub is_minimized: bool,
    /// Local bookkeeping only; everything that crosses the wire is closed.
    #[serde(skip)]
    pub status: SessionStatus,
}

impl FocusSession {
    /// Opens a session for `context` starting at `started_at`.
    pub fn open(id: String, context: &ContextSnapshot, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            app: context.app.clone(),
            window_title: context.window_title.clone(),
            url: context.url.clone(),
            tab_title: context.tab_title.clone(),
            tab_count: context.tab_count,
            document_path: context.document_path.clone(),
            start_time: started_at,
            end_time: started_at,
            duration_ms: 0,
            is_full_screen: context.is_full_screen,
            is_minimized: context.is_minimized,
            status: SessionStatus::Active,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Closes the session at `ended_at` (clamped to the start time).
    /// Returns `false` without touching anything if it was already closed.
    pub fn close(&mut self, ended_at: DateTime<Utc>) -> bool {
        if !self.is_open() {
            return false;
        }

        let ended_at = ended_at.max(self.start_time);
        self.end_time = ended_at;
        self.duration_ms = (ended_at - self.start_time).num_milliseconds().max(0) as u64;
        self.status = SessionStatus::Closed;
        true
    }

    /// `duration == end - start` (and `end >= start`).
    pub fn has_consistent_duration(&self) -> bool {
        let span = (self.end_time - self.start_time).num_milliseconds();
        span >= 0 && span as u64 == self.duration_ms
    }
}
