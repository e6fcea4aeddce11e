use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{format_datetime, parse_datetime, parse_optional_datetime, parse_status, to_i64, to_u64},
    Database, LocalStore,
};
use crate::models::{AppIdentity, FocusSession, SessionStatus};

const SESSION_COLUMNS: &str = "id, app_name, package_id, window_title, url, tab_title, tab_count, \
     document_path, start_time, end_time, duration_ms, is_full_screen, is_minimized, status";

fn row_to_session(row: &Row) -> Result<FocusSession> {
    let start_time: String = row.get("start_time")?;
    let end_time: String = row.get("end_time")?;
    let duration_ms: i64 = row.get("duration_ms")?;
    let tab_count: Option<i64> = row.get("tab_count")?;
    let status: String = row.get("status")?;

    Ok(FocusSession {
        id: row.get("id")?,
        app: AppIdentity {
            name: row.get("app_name")?,
            package_id: row.get("package_id")?,
        },
        window_title: row.get("window_title")?,
        url: row.get("url")?,
        tab_title: row.get("tab_title")?,
        tab_count: tab_count
            .map(|count| u32::try_from(count).context("tab_count out of range"))
            .transpose()?,
        document_path: row.get("document_path")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_datetime(&end_time, "end_time")?,
        duration_ms: to_u64(duration_ms, "duration_ms")?,
        is_full_screen: row.get("is_full_screen")?,
        is_minimized: row.get("is_minimized")?,
        status: parse_status(&status)?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &FocusSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO focus_sessions (id, app_name, package_id, window_title, url, tab_title, tab_count,
                     document_path, start_time, end_time, duration_ms, is_full_screen, is_minimized, status, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?9)",
                params![
                    record.id,
                    record.app.name,
                    record.app.package_id,
                    record.window_title,
                    record.url,
                    record.tab_title,
                    record.tab_count,
                    record.document_path,
                    format_datetime(&record.start_time),
                    format_datetime(&record.end_time),
                    to_i64(record.duration_ms)?,
                    record.is_full_screen,
                    record.is_minimized,
                    record.status.as_str(),
                ],
            )
            .with_context(|| format!("failed to insert session {}", record.id))?;
            Ok(())
        })
        .await
    }

    /// Writes the close of a session. Only rows still active are updated, so
    /// a closed row keeps the values it was closed with.
    pub async fn close_session(&self, session: &FocusSession) -> Result<()> {
        if session.is_open() {
            bail!("session {} is still active", session.id);
        }

        let record = session.clone();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE focus_sessions
                     SET end_time = ?1,
                         duration_ms = ?2,
                         status = ?3,
                         last_seen_at = ?1
                     WHERE id = ?4 AND status = ?5",
                    params![
                        format_datetime(&record.end_time),
                        to_i64(record.duration_ms)?,
                        SessionStatus::Closed.as_str(),
                        record.id,
                        SessionStatus::Active.as_str(),
                    ],
                )
                .with_context(|| format!("failed to close session {}", record.id))?;

            if changed == 0 {
                bail!("session {} is unknown or already closed", record.id);
            }
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<FocusSession>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM focus_sessions WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![session_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_closed_sessions_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<FocusSession>> {
        let since = since.map(|at| format_datetime(&at));
        let limit = i64::try_from(limit).context("limit out of range")?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS}
                 FROM focus_sessions
                 WHERE status = ?1 AND (?2 IS NULL OR start_time > ?2)
                 ORDER BY start_time ASC
                 LIMIT ?3"
            ))?;

            let mut rows = stmt.query(params![SessionStatus::Closed.as_str(), since, limit])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    /// Latest `start_time` ever recorded, open or closed.
    pub async fn latest_session_start(&self) -> Result<Option<DateTime<Utc>>> {
        self.execute(|conn| {
            let latest: Option<String> = conn
                .query_row("SELECT MAX(start_time) FROM focus_sessions", [], |row| row.get(0))
                .context("failed to read latest session start")?;
            parse_optional_datetime(latest, "start_time")
        })
        .await
    }

    pub async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE focus_sessions SET last_seen_at = ?1 WHERE id = ?2 AND status = ?3",
                params![format_datetime(&at), session_id, SessionStatus::Active.as_str()],
            )
            .context("failed to record session heartbeat")?;
            Ok(())
        })
        .await
    }

    pub async fn close_orphaned_sessions(&self) -> Result<Vec<FocusSession>> {
        self.execute(|conn| {
            let tx = conn.transaction()?;
            let mut orphans = Vec::new();
            {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {SESSION_COLUMNS}, last_seen_at FROM focus_sessions WHERE status = ?1"
                ))?;
                let mut rows = stmt.query(params![SessionStatus::Active.as_str()])?;
                while let Some(row) = rows.next()? {
                    let mut session = row_to_session(row)?;
                    let last_seen = parse_optional_datetime(row.get("last_seen_at")?, "last_seen_at")?
                        .unwrap_or(session.start_time);
                    session.close(last_seen);
                    orphans.push(session);
                }
            }

            for session in &orphans {
                tx.execute(
                    "UPDATE focus_sessions
                     SET end_time = ?1, duration_ms = ?2, status = ?3
                     WHERE id = ?4",
                    params![
                        format_datetime(&session.end_time),
                        to_i64(session.duration_ms)?,
                        SessionStatus::Closed.as_str(),
                        session.id,
                    ],
                )?;
            }
            tx.commit().context("failed to commit orphan recovery")?;
            Ok(orphans)
        })
        .await
    }
}

#[async_trait]
impl LocalStore for Database {
    async fn insert(&self, session: &FocusSession) -> Result<()> {
        self.insert_session(session).await
    }

    async fn update(&self, session: &FocusSession) -> Result<()> {
        self.close_session(session).await
    }

    async fn query_unsynced(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<FocusSession>> {
        self.list_closed_sessions_since(since, limit).await
    }

    async fn latest_start(&self) -> Result<Option<DateTime<Utc>>> {
        self.latest_session_start().await
    }

    async fn mark_seen(&self, session_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.touch_session(session_id, at).await
    }

    async fn close_orphaned(&self) -> Result<Vec<FocusSession>> {
        self.close_orphaned_sessions().await
    }

    async fn load_watermark(&self) -> Result<Option<DateTime<Utc>>> {
        self.get_sync_watermark().await
    }

    async fn save_watermark(&self, watermark: DateTime<Utc>) -> Result<()> {
        self.set_sync_watermark(watermark).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Schema;
    use crate::models::ContextSnapshot;
    use chrono::{Duration, TimeZone};

    fn open_db(dir: &tempfile::TempDir) -> Database {
        Database::new(dir.path().join("agent.sqlite3"), Schema::Agent).unwrap()
    }

    fn context(app: &str) -> ContextSnapshot {
        ContextSnapshot {
            app: AppIdentity::new(app, Some("com.example.app")),
            window_title: format!("{app} window"),
            url: None,
            tab_title: None,
            tab_count: Some(3),
            document_path: None,
            is_full_screen: false,
            is_minimized: false,
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 2, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[tokio::test]
    async fn latest_start_covers_open_and_closed_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        assert_eq!(db.latest_start().await.unwrap(), None);

        let mut closed = FocusSession::open("a".into(), &context("Code"), t(30));
        db.insert(&closed).await.unwrap();
        closed.close(t(40));
        db.update(&closed).await.unwrap();
        db.insert(&FocusSession::open("b".into(), &context("Slack"), t(45)))
            .await
            .unwrap();

        assert_eq!(db.latest_start().await.unwrap(), Some(t(45)));
    }

    #[tokio::test]
    async fn open_sessions_are_never_returned_as_unsynced() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let mut first = FocusSession::open("a".into(), &context("Code"), t(0));
        db.insert(&first).await.unwrap();
        first.close(t(10));
        db.update(&first).await.unwrap();

        let open = FocusSession::open("b".into(), &context("Slack"), t(10));
        db.insert(&open).await.unwrap();

        let unsynced = db.query_unsynced(None, 100).await.unwrap();
        assert_eq!(unsynced, vec![first.clone()]);

        let after = db.query_unsynced(Some(t(0)), 100).await.unwrap();
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn closed_sessions_are_not_closed_twice() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let mut session = FocusSession::open("a".into(), &context("Code"), t(0));
        db.insert(&session).await.unwrap();
        session.close(t(5));
        db.update(&session).await.unwrap();

        let mut again = session.clone();
        again.end_time = t(50);
        again.duration_ms = 50_000;
        assert!(db.update(&again).await.is_err());

        let stored = db.get_session("a").await.unwrap().unwrap();
        assert_eq!(stored.duration_ms, 5_000);
    }

    #[tokio::test]
    async fn unsynced_query_is_ordered_and_limited() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        for (i, id) in ["c", "a", "b"].iter().enumerate() {
            let start = t(i as i64 * 10);
            let mut session = FocusSession::open(id.to_string(), &context("Code"), start);
            db.insert(&session).await.unwrap();
            session.close(start + Duration::seconds(5));
            db.update(&session).await.unwrap();
        }

        let first_two = db.query_unsynced(None, 2).await.unwrap();
        let ids: Vec<_> = first_two.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn orphaned_sessions_close_at_last_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let session = FocusSession::open("a".into(), &context("Code"), t(0));
        db.insert(&session).await.unwrap();
        db.mark_seen("a", t(42)).await.unwrap();

        let recovered = db.close_orphaned().await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].end_time, t(42));
        assert_eq!(recovered[0].duration_ms, 42_000);

        let stored = db.get_session("a").await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Closed);
        assert!(stored.has_consistent_duration());
        assert!(db.close_orphaned().await.unwrap().is_empty());
    }
}
