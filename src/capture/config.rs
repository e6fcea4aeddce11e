use serde::{Deserialize, Serialize};

/// Tunable thresholds for the capture state machine. All durations are in
/// seconds unless the field name says otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureConfig {
    /// No input for longer than this while active moves the recorder to idle.
    pub idle_threshold_secs: u64,

    /// A title-only change must persist this long before it splits a session.
    pub title_debounce_ms: u64,

    /// Fallback re-sample interval while the context is changing.
    pub fast_interval_secs: f64,
    /// ... once it has been stable for `fast_window_secs`.
    pub medium_interval_secs: f64,
    /// ... once it has been stable for `medium_window_secs`.
    pub slow_interval_secs: f64,
    pub fast_window_secs: u64,
    pub medium_window_secs: u64,

    /// Interval multiplier while the device asks us to save power.
    pub reduced_power_multiplier: f64,

    /// A context read slower than this counts as unavailable.
    pub sample_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            idle_threshold_secs: 60,
            title_debounce_ms: 2_000,
            fast_interval_secs: 3.0,
            medium_interval_secs: 6.0,
            slow_interval_secs: 12.0,
            fast_window_secs: 30,
            medium_window_secs: 300,
            reduced_power_multiplier: 1.5,
            sample_timeout_ms: 2_000,
        }
    }
}

/// Ceiling for every interval-like value; a day is far past any useful setting.
const MAX_SECS: u64 = 86_400;

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

impl CaptureConfig {
    /// Pulls every value into a range the recorder can turn into durations
    /// without overflowing. Non-finite floats fall back to the defaults.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let max_secs = MAX_SECS as f64;
        Self {
            idle_threshold_secs: self.idle_threshold_secs.clamp(1, MAX_SECS),
            title_debounce_ms: self.title_debounce_ms.min(MAX_SECS * 1_000),
            fast_interval_secs: finite_or(self.fast_interval_secs, defaults.fast_interval_secs)
                .clamp(0.1, max_secs),
            medium_interval_secs: finite_or(self.medium_interval_secs, defaults.medium_interval_secs)
                .clamp(0.1, max_secs),
            slow_interval_secs: finite_or(self.slow_interval_secs, defaults.slow_interval_secs)
                .clamp(0.1, max_secs),
            fast_window_secs: self.fast_window_secs.min(MAX_SECS),
            medium_window_secs: self.medium_window_secs.min(MAX_SECS),
            reduced_power_multiplier: finite_or(
                self.reduced_power_multiplier,
                defaults.reduced_power_multiplier,
            )
            .clamp(1.0, 10.0),
            sample_timeout_ms: self.sample_timeout_ms.clamp(100, 60_000),
        }
    }
}
