//! In-memory ingestion queue drained into the durable store in bounded
//! batches.
//!
//! Accounting: every enqueued record is counted in `pending` until the batch
//! it belongs to resolves, then moves to `drained` or `failed`. Failed
//! batches are dropped, not retried; clients resend because their watermark
//! did not advance.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::models::FocusSession;

use super::store::DurableStore;
use super::writer::{max_batch_size, write_batch, SESSION_COLUMNS};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const REPORT_CHANNEL_CAPACITY: usize = 64;

/// A validated session plus the identity it was submitted under.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRecord {
    pub session: FocusSession,
    pub account_id: String,
    pub device_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounters {
    pub pending: u64,
    pub drained: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub size: usize,
    /// Rows that were new; duplicates of already-stored ids don't count.
    pub inserted: usize,
    pub error: Option<String>,
}

/// Summary of one drain pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub records: usize,
    pub drained: usize,
    pub failed: usize,
    pub batches: Vec<BatchOutcome>,
}

#[derive(Default)]
struct QueueState {
    records: VecDeque<QueuedRecord>,
    counters: QueueCounters,
}

struct TriggerHandle {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    draining: AtomicBool,
    /// Woken whenever the drain slot is released.
    idle: Notify,
    /// Drains spawned outside the periodic trigger.
    spawned: TaskTracker,
    shut_down: AtomicBool,
    store: Arc<dyn DurableStore>,
    batch_size: usize,
    reports: broadcast::Sender<DrainReport>,
    trigger: Mutex<Option<TriggerHandle>>,
}

#[derive(Clone)]
pub struct IngestionQueue {
    inner: Arc<QueueInner>,
}

/// Holds the single-flight drain slot; releases it on drop, including when
/// the drain future is cancelled mid-way.
struct DrainSlot<'a>(&'a QueueInner);

impl<'a> DrainSlot<'a> {
    fn acquire(inner: &'a QueueInner) -> Option<Self> {
        inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(inner))
    }
}

impl Drop for DrainSlot<'_> {
    fn drop(&mut self) {
        self.0.draining.store(false, Ordering::Release);
        self.0.idle.notify_waiters();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl IngestionQueue {
    /// Sizes batches from the store's parameter ceiling. Fails when not even
    /// a single record fits in one statement.
    pub fn new(store: Arc<dyn DurableStore>) -> Result<Self> {
        let batch_size = max_batch_size(store.param_ceiling(), SESSION_COLUMNS.len());
        if batch_size == 0 {
            bail!(
                "parameter ceiling {} is too small for {} columns per record",
                store.param_ceiling(),
                SESSION_COLUMNS.len()
            );
        }

        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                draining: AtomicBool::new(false),
                idle: Notify::new(),
                spawned: TaskTracker::new(),
                shut_down: AtomicBool::new(false),
                store,
                batch_size,
                reports,
                trigger: Mutex::new(None),
            }),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    /// Appends records and returns how many were appended. An empty input
    /// changes nothing.
    pub fn enqueue(&self, records: Vec<QueuedRecord>) -> usize {
        let count = records.len();
        if count == 0 {
            return 0;
        }
        let mut state = lock(&self.inner.state);
        state.counters.pending += count as u64;
        state.records.extend(records);
        count
    }

    pub fn counters(&self) -> QueueCounters {
        lock(&self.inner.state).counters
    }

    pub fn pending(&self) -> u64 {
        self.counters().pending
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DrainReport> {
        self.inner.reports.subscribe()
    }

    /// Writes everything queued so far in bounded batches. Returns `None`
    /// when the queue was empty or another drain already holds the slot.
    pub async fn drain(&self) -> Option<DrainReport> {
        let Some(_slot) = DrainSlot::acquire(&self.inner) else {
            log_debug!("drain already in progress, skipping");
            return None;
        };

        let records: Vec<QueuedRecord> = lock(&self.inner.state).records.drain(..).collect();
        if records.is_empty() {
            return None;
        }

        let started_at = Utc::now();
        let started = Instant::now();
        let mut batches = Vec::new();
        let mut drained = 0;
        let mut failed = 0;

        for batch in records.chunks(self.inner.batch_size) {
            let result = write_batch(self.inner.store.as_ref(), batch).await;

            let mut state = lock(&self.inner.state);
            state.counters.pending = state.counters.pending.saturating_sub(batch.len() as u64);
            match result {
                Ok(inserted) => {
                    state.counters.drained += batch.len() as u64;
                    drained += batch.len();
                    batches.push(BatchOutcome {
                        size: batch.len(),
                        inserted,
                        error: None,
                    });
                }
                Err(err) => {
                    state.counters.failed += batch.len() as u64;
                    failed += batch.len();
                    drop(state);
                    log_warn!("dropping batch of {} records: {}", batch.len(), err);
                    batches.push(BatchOutcome {
                        size: batch.len(),
                        inserted: 0,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        let report = DrainReport {
            started_at,
            elapsed_ms: started.elapsed().as_millis() as u64,
            records: records.len(),
            drained,
            failed,
            batches,
        };

        log_info!(
            "drained {} records in {} batches ({} failed, {}ms)",
            report.records,
            report.batches.len(),
            report.failed,
            report.elapsed_ms
        );

        // No subscribers is fine.
        let _ = self.inner.reports.send(report.clone());
        Some(report)
    }

    /// Starts the periodic drain trigger. Returns `false` if it is already
    /// running or the queue has been shut down.
    pub fn start(&self, interval: Duration) -> bool {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return false;
        }

        let mut trigger = lock(&self.inner.trigger);
        if trigger.is_some() {
            return false;
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(drain_trigger(
            Arc::downgrade(&self.inner),
            interval,
            cancel_token.clone(),
        ));
        *trigger = Some(TriggerHandle {
            cancel_token,
            handle,
        });
        true
    }

    /// Stops the periodic trigger. Safe to call any number of times; a drain
    /// already in flight runs to completion.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(trigger) = lock(&self.inner.trigger).as_ref() {
            trigger.cancel_token.cancel();
        }
        log_info!("ingestion queue shut down");
    }

    /// Starts a drain in the background without waiting for it. The task is
    /// tracked, so [`IngestionQueue::shutdown_and_flush`] waits for it.
    pub fn spawn_drain(&self) {
        let queue = self.clone();
        self.inner.spawned.spawn(async move {
            queue.drain().await;
        });
    }

    fn has_queued_records(&self) -> bool {
        !lock(&self.inner.state).records.is_empty()
    }

    async fn wait_until_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_draining() {
                return;
            }
            notified.await;
        }
    }

    /// Shuts down, lets every in-flight drain finish, then drains until
    /// nothing is queued. Returns the report of the last drain it ran.
    pub async fn shutdown_and_flush(&self) -> Option<DrainReport> {
        self.shutdown();

        let trigger = lock(&self.inner.trigger).take();
        if let Some(trigger) = trigger {
            if let Err(err) = trigger.handle.await {
                log_warn!("drain trigger task ended abnormally: {}", err);
            }
        }

        self.inner.spawned.close();
        self.inner.spawned.wait().await;

        let mut last = None;
        loop {
            self.wait_until_idle().await;
            if let Some(report) = self.drain().await {
                last = Some(report);
                continue;
            }
            if !self.is_draining() && !self.has_queued_records() {
                return last;
            }
        }
    }
}

async fn drain_trigger(
    queue: Weak<QueueInner>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = queue.upgrade() else { break };
                let queue = IngestionQueue { inner };
                queue.drain().await;
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}
