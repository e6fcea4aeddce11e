use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::transport::{SyncOutcome, SyncTransport};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_warn};

/// Upper bound on one cycle (local read + HTTP round trip).
const CYCLE_TIMEOUT_SECS: u64 = 60;

/// Runs sync cycles on a fixed interval, one at a time. On cancellation it
/// makes one last attempt so sessions closed during shutdown go out too.
pub async fn sync_loop(
    mut transport: SyncTransport,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_bounded(&mut transport).await;
            }
            _ = cancel_token.cancelled() => {
                run_bounded(&mut transport).await;
                info!("sync loop shutting down");
                break;
            }
        }
    }
}

async fn run_bounded(transport: &mut SyncTransport) -> Option<SyncOutcome> {
    match tokio::time::timeout(Duration::from_secs(CYCLE_TIMEOUT_SECS), transport.run_cycle()).await {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(err)) => {
            log_error!("sync cycle failed: {err:?}");
            None
        }
        Err(_) => {
            log_warn!("sync cycle timed out (> {}s)", CYCLE_TIMEOUT_SECS);
            None
        }
    }
}

pub struct SyncController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl SyncController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start(&mut self, transport: SyncTransport, interval: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("sync already running");
        }

        let cancel_token = CancellationToken::new();
        self.handle = Some(tokio::spawn(sync_loop(
            transport,
            interval,
            cancel_token.clone(),
        )));
        self.cancel_token = Some(cancel_token);
        info!("Sync started (every {}s)", interval.as_secs());
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sync loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for SyncController {
    fn default() -> Self {
        Self::new()
    }
}
