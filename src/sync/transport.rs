use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::LocalStore;
use crate::models::MAX_BATCH_SESSIONS;

use super::client::{IngestClient, TransportError};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Result of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No closed session past the watermark.
    NothingToSend,
    Accepted {
        sent: usize,
        watermark: DateTime<Utc>,
        sync_id: String,
    },
    /// The endpoint refused our credential. Retrying will not help until the
    /// token is fixed.
    Unauthorized,
    /// Anything else; the same sessions go out again next cycle.
    Deferred { reason: String },
}

/// Moves closed sessions from the local store to the ingestion endpoint,
/// one bounded batch per cycle, behind a start-time watermark.
pub struct SyncTransport {
    store: Arc<dyn LocalStore>,
    client: Arc<dyn IngestClient>,
    watermark: Option<DateTime<Utc>>,
    watermark_loaded: bool,
    batch_size: usize,
}

impl SyncTransport {
    pub fn new(store: Arc<dyn LocalStore>, client: Arc<dyn IngestClient>, batch_size: usize) -> Self {
        Self {
            store,
            client,
            watermark: None,
            watermark_loaded: false,
            batch_size: batch_size.clamp(1, MAX_BATCH_SESSIONS),
        }
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Reads up to one batch past the watermark, sends it, and advances the
    /// watermark to the batch's latest start time only on acceptance.
    pub async fn run_cycle(&mut self) -> Result<SyncOutcome> {
        if !self.watermark_loaded {
            self.watermark = self.store.load_watermark().await?;
            self.watermark_loaded = true;
        }

        let batch = self
            .store
            .query_unsynced(self.watermark, self.batch_size)
            .await?;
        let Some(batch_max) = batch.iter().map(|s| s.start_time).max() else {
            log_debug!("nothing to sync past {:?}", self.watermark);
            return Ok(SyncOutcome::NothingToSend);
        };

        match self.client.submit(&batch).await {
            Ok(accepted) => {
                let next = self.watermark.map_or(batch_max, |w| w.max(batch_max));
                self.watermark = Some(next);
                log_info!(
                    "sync {} accepted {} sessions; watermark now {}",
                    accepted.sync_id,
                    batch.len(),
                    next
                );
                self.store.save_watermark(next).await?;
                Ok(SyncOutcome::Accepted {
                    sent: batch.len(),
                    watermark: next,
                    sync_id: accepted.sync_id,
                })
            }
            Err(TransportError::Unauthorized) => {
                log_error!(
                    "ingest endpoint rejected our credential; check the sync token in the agent settings"
                );
                Ok(SyncOutcome::Unauthorized)
            }
            Err(TransportError::PayloadTooLarge(size)) => {
                self.batch_size = (size / 2).max(1);
                log_warn!(
                    "endpoint refused a batch of {size}; retrying with {}",
                    self.batch_size
                );
                Ok(SyncOutcome::Deferred {
                    reason: format!("batch of {size} too large"),
                })
            }
            Err(err) => {
                log_warn!("sync deferred: {err}");
                Ok(SyncOutcome::Deferred {
                    reason: err.to_string(),
                })
            }
        }
    }
}
