use serde::Serialize;

use crate::ingest::{DrainReport, QueueCounters};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub queue: QueueCounters,
    pub drain_count: u64,
    pub failed_batch_count: u64,
    pub recent_drains: Vec<DrainReport>,
}
