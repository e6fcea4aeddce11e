use chrono::{DateTime, Utc};
use std::time::Duration;

use super::config::CaptureConfig;

/// Adaptive fallback re-sample interval: fast while the context is moving,
/// slower the longer it stays put, stretched under reduced power.
#[derive(Debug, Clone)]
pub struct SamplingCadence {
    last_change: Option<DateTime<Utc>>,
    reduced_power: bool,
}

impl SamplingCadence {
    pub fn new() -> Self {
        Self {
            last_change: None,
            reduced_power: false,
        }
    }

    /// A real context change was observed; snap back to the fastest tier.
    pub fn mark_change(&mut self, at: DateTime<Utc>) {
        self.last_change = Some(at);
    }

    pub fn set_reduced_power(&mut self, enabled: bool) {
        self.reduced_power = enabled;
    }

    pub fn reduced_power(&self) -> bool {
        self.reduced_power
    }

    pub fn interval(&self, now: DateTime<Utc>, config: &CaptureConfig) -> Duration {
        let stable_secs = self
            .last_change
            .map(|at| (now - at).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);

        let base = if stable_secs < config.fast_window_secs as f64 {
            config.fast_interval_secs
        } else if stable_secs <= config.medium_window_secs as f64 {
            config.medium_interval_secs
        } else {
            config.slow_interval_secs
        };

        let secs = if self.reduced_power {
            base * config.reduced_power_multiplier
        } else {
            base
        };

        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

impl Default for SamplingCadence {
    fn default() -> Self {
        Self::new()
    }
}
