use crate::models::FocusSession;

use super::error::IngestError;

/// Checks a submitted batch. Runs before anything is enqueued, so a failure
/// leaves the queue untouched.
pub fn validate_batch(sessions: &[FocusSession], max_sessions: usize) -> Result<(), IngestError> {
    if sessions.len() > max_sessions {
        return Err(IngestError::PayloadTooLarge {
            count: sessions.len(),
            limit: max_sessions,
        });
    }
    if sessions.is_empty() {
        return Err(IngestError::Validation("batch contains no sessions".into()));
    }

    for (index, session) in sessions.iter().enumerate() {
        validate_session(session)
            .map_err(|reason| IngestError::Validation(format!("session {index}: {reason}")))?;
    }
    Ok(())
}

fn validate_session(session: &FocusSession) -> Result<(), String> {
    if session.id.trim().is_empty() {
        return Err("id is empty".into());
    }
    if session.app.name.trim().is_empty() {
        return Err(format!("{}: appName is empty", session.id));
    }
    if session.end_time < session.start_time {
        return Err(format!("{}: endTime is before startTime", session.id));
    }
    if !session.has_consistent_duration() {
        return Err(format!(
            "{}: duration {} does not match endTime - startTime",
            session.id, session.duration_ms
        ));
    }
    Ok(())
}
