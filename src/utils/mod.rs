pub mod logging;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// Truncates a timestamp to millisecond precision, the precision every
/// store in the pipeline keeps.
pub fn to_millis_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(at)
}

/// Current wall-clock time at millisecond precision.
pub fn now_millis() -> DateTime<Utc> {
    to_millis_precision(Utc::now())
}
