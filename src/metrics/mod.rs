mod types;

pub use types::{MetricsSnapshot, SystemMetrics};

use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::ingest::{DrainReport, IngestionQueue, QueueCounters};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

const MAX_RECENT_DRAINS: usize = 20;

/// Keeps the last few drain reports and samples this process's CPU and RAM.
#[derive(Clone)]
pub struct DrainMetrics {
    inner: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    recent_drains: Vec<DrainReport>,
    drain_count: u64,
    failed_batch_count: u64,
    system: System,
    pid: Pid,
}

impl DrainMetrics {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta between refreshes, so take a baseline now.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_drains: Vec::with_capacity(MAX_RECENT_DRAINS),
                drain_count: 0,
                failed_batch_count: 0,
                system,
                pid,
            })),
        }
    }

    pub async fn record_drain(&self, report: DrainReport) {
        let mut state = self.inner.lock().await;

        state.drain_count += 1;
        state.failed_batch_count += report
            .batches
            .iter()
            .filter(|batch| batch.error.is_some())
            .count() as u64;

        state.recent_drains.push(report);
        if state.recent_drains.len() > MAX_RECENT_DRAINS {
            state.recent_drains.remove(0);
        }
    }

    pub async fn get_snapshot(&self, queue: QueueCounters) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let pid = state.pid;

        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        let system = match state.system.process(pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            },
        };

        MetricsSnapshot {
            system,
            queue,
            drain_count: state.drain_count,
            failed_batch_count: state.failed_batch_count,
            recent_drains: state.recent_drains.clone(),
        }
    }

    /// Records every drain report the queue publishes until the queue goes
    /// away.
    pub fn follow(&self, queue: &IngestionQueue) -> JoinHandle<()> {
        let mut reports = queue.subscribe();
        let metrics = self.clone();

        tokio::spawn(async move {
            loop {
                match reports.recv().await {
                    Ok(report) => metrics.record_drain(report).await,
                    Err(RecvError::Lagged(skipped)) => {
                        log_warn!("metrics missed {} drain reports", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for DrainMetrics {
    fn default() -> Self {
        Self::new()
    }
}
