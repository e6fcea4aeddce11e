//! In-memory doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::LocalStore;
use crate::models::{AppIdentity, ContextSnapshot, FocusSession, SessionStatus};
use crate::sensing::{ContextSampler, SamplingError};
use crate::utils::now_millis;

#[derive(Default)]
pub struct MemoryLocalStore {
    sessions: Mutex<Vec<FocusSession>>,
    last_seen: Mutex<Vec<(String, DateTime<Utc>)>>,
    watermark: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryLocalStore {
    pub fn closed(&self) -> Vec<FocusSession> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.status == SessionStatus::Closed)
            .cloned()
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_open())
            .count()
    }

    /// Inserts an already-closed session, as if recorded earlier.
    pub fn seed_closed(&self, session: FocusSession) {
        assert!(!session.is_open());
        self.sessions.lock().unwrap().push(session);
    }

    pub fn seed_open(&self, app: &str) {
        let context = ContextSnapshot {
            app: AppIdentity::new(app, None),
            window_title: String::new(),
            url: None,
            tab_title: None,
            tab_count: None,
            document_path: None,
            is_full_screen: false,
            is_minimized: false,
        };
        let session = FocusSession::open(uuid::Uuid::new_v4().to_string(), &context, now_millis());
        self.sessions.lock().unwrap().push(session);
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        *self.watermark.lock().unwrap()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn insert(&self, session: &FocusSession) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.iter().any(|s| s.id == session.id) {
            bail!("duplicate session {}", session.id);
        }
        sessions.push(session.clone());
        Ok(())
    }

    async fn update(&self, session: &FocusSession) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) if existing.is_open() => {
                *existing = session.clone();
                Ok(())
            }
            Some(_) => bail!("session {} already closed", session.id),
            None => bail!("unknown session {}", session.id),
        }
    }

    async fn query_unsynced(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<FocusSession>> {
        let mut closed: Vec<_> = self
            .closed()
            .into_iter()
            .filter(|s| since.map_or(true, |w| s.start_time > w))
            .collect();
        closed.sort_by_key(|s| s.start_time);
        closed.truncate(limit);
        Ok(closed)
    }

    async fn latest_start(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.sessions.lock().unwrap().iter().map(|s| s.start_time).max())
    }

    async fn mark_seen(&self, session_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.last_seen.lock().unwrap().push((session_id.to_string(), at));
        Ok(())
    }

    async fn close_orphaned(&self) -> Result<Vec<FocusSession>> {
        let last_seen = self.last_seen.lock().unwrap().clone();
        let mut sessions = self.sessions.lock().unwrap();
        let mut recovered = Vec::new();
        for session in sessions.iter_mut().filter(|s| s.is_open()) {
            let seen = last_seen
                .iter()
                .rev()
                .find(|(id, _)| *id == session.id)
                .map(|(_, at)| *at)
                .unwrap_or(session.start_time);
            session.close(seen);
            recovered.push(session.clone());
        }
        Ok(recovered)
    }

    async fn load_watermark(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.watermark())
    }

    async fn save_watermark(&self, watermark: DateTime<Utc>) -> Result<()> {
        let mut current = self.watermark.lock().unwrap();
        if current.map_or(true, |w| watermark > w) {
            *current = Some(watermark);
        }
        Ok(())
    }
}

/// Plays back a fixed script of samples, then repeats the last entry.
pub struct ScriptedSampler {
    script: Mutex<VecDeque<Result<ContextSnapshot, SamplingError>>>,
    last: Mutex<Result<ContextSnapshot, SamplingError>>,
}

impl ScriptedSampler {
    pub fn new(script: Vec<Result<ContextSnapshot, SamplingError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(Err(SamplingError::Unavailable("script exhausted".into()))),
        }
    }

    pub fn repeating(app: &str, title: &str) -> Self {
        let context = ContextSnapshot {
            app: AppIdentity::new(app, None),
            window_title: title.into(),
            url: None,
            tab_title: None,
            tab_count: None,
            document_path: None,
            is_full_screen: false,
            is_minimized: false,
        };
        Self::new(vec![Ok(context)])
    }

    pub fn unavailable() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl ContextSampler for ScriptedSampler {
    async fn sample(&self) -> Result<ContextSnapshot, SamplingError> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => {
                *self.last.lock().unwrap() = result.clone();
                result
            }
            None => self.last.lock().unwrap().clone(),
        }
    }
}
