use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::{
    helpers::{format_datetime, parse_optional_datetime},
    Database,
};

const WATERMARK_KEY: &str = "sync_watermark";

impl Database {
    pub async fn get_sync_watermark(&self) -> Result<Option<DateTime<Utc>>> {
        self.execute(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM sync_state WHERE key = ?1",
                    params![WATERMARK_KEY],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to read sync watermark")?;
            parse_optional_datetime(raw, WATERMARK_KEY)
        })
        .await
    }

    /// Stores the watermark. It only ever moves forward: an older value than
    /// the stored one is ignored.
    pub async fn set_sync_watermark(&self, watermark: DateTime<Utc>) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value
                 WHERE excluded.value > sync_state.value",
                params![WATERMARK_KEY, format_datetime(&watermark)],
            )
            .context("failed to persist sync watermark")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, Schema};
    use chrono::{Duration, TimeZone, Utc};

    #[tokio::test]
    async fn watermark_only_moves_forward() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("agent.sqlite3"), Schema::Agent).unwrap();
        assert_eq!(db.get_sync_watermark().await.unwrap(), None);

        let t1 = Utc.with_ymd_and_hms(2025, 4, 2, 8, 0, 0).unwrap();
        db.set_sync_watermark(t1).await.unwrap();
        db.set_sync_watermark(t1 - Duration::seconds(30)).await.unwrap();
        assert_eq!(db.get_sync_watermark().await.unwrap(), Some(t1));

        let t2 = t1 + Duration::milliseconds(1);
        db.set_sync_watermark(t2).await.unwrap();
        assert_eq!(db.get_sync_watermark().await.unwrap(), Some(t2));
    }
}
