//! Turns queued records into bounded multi-row upserts.

use rusqlite::types::Value;

use super::queue::QueuedRecord;
use super::store::{DurableStore, StoreError};

/// Columns bound per record. `duration_ms` is derived by the table itself.
pub const SESSION_COLUMNS: [&str; 14] = [
    "id",
    "account_id",
    "device_id",
    "app_name",
    "package_id",
    "window_title",
    "url",
    "tab_title",
    "tab_count",
    "document_path",
    "start_ms",
    "end_ms",
    "is_full_screen",
    "is_minimized",
];

/// Largest batch whose `rows * columns` stays strictly under `param_ceiling`.
/// Zero when not even one row fits.
pub fn max_batch_size(param_ceiling: usize, columns: usize) -> usize {
    if columns == 0 {
        return 0;
    }
    param_ceiling.saturating_sub(1) / columns
}

/// `INSERT .. VALUES (..), (..) ON CONFLICT(id) DO NOTHING` for `rows` rows.
pub fn upsert_statement(rows: usize) -> String {
    let placeholders = format!("({})", vec!["?"; SESSION_COLUMNS.len()].join(", "));
    let values = vec![placeholders; rows].join(", ");
    format!(
        "INSERT INTO focus_sessions ({}) VALUES {} ON CONFLICT(id) DO NOTHING",
        SESSION_COLUMNS.join(", "),
        values
    )
}

fn bind_record(record: &QueuedRecord, params: &mut Vec<Value>) {
    let session = &record.session;
    params.extend([
        Value::Text(session.id.clone()),
        Value::Text(record.account_id.clone()),
        Value::Text(record.device_id.clone()),
        Value::Text(session.app.name.clone()),
        session.app.package_id.clone().map_or(Value::Null, Value::Text),
        Value::Text(session.window_title.clone()),
        session.url.clone().map_or(Value::Null, Value::Text),
        session.tab_title.clone().map_or(Value::Null, Value::Text),
        session
            .tab_count
            .map_or(Value::Null, |count| Value::Integer(i64::from(count))),
        session.document_path.clone().map_or(Value::Null, Value::Text),
        Value::Integer(session.start_time.timestamp_millis()),
        Value::Integer(session.end_time.timestamp_millis()),
        Value::Integer(i64::from(session.is_full_screen)),
        Value::Integer(i64::from(session.is_minimized)),
    ]);
}

/// Writes one batch as a single idempotent statement. Returns the number of
/// rows that were new.
pub async fn write_batch(
    store: &dyn DurableStore,
    batch: &[QueuedRecord],
) -> Result<usize, StoreError> {
    if batch.is_empty() {
        return Ok(0);
    }

    let mut params = Vec::with_capacity(batch.len() * SESSION_COLUMNS.len());
    for record in batch {
        bind_record(record, &mut params);
    }

    store.execute(&upsert_statement(batch.len()), params).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_stays_strictly_under_ceiling() {
        assert_eq!(max_batch_size(100, 14), 7);
        assert!(7 * 14 < 100);
        assert!(8 * 14 >= 100);
        assert_eq!(max_batch_size(98, 14), 6);
        assert_eq!(max_batch_size(10, 14), 0);
        assert_eq!(max_batch_size(100, 0), 0);
    }

    #[test]
    fn statement_has_one_placeholder_per_parameter() {
        let sql = upsert_statement(3);
        assert_eq!(sql.matches('?').count(), 3 * SESSION_COLUMNS.len());
        assert!(sql.ends_with("ON CONFLICT(id) DO NOTHING"));
    }
}
