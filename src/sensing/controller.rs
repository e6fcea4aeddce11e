use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureConfig, CaptureState, SessionRecorder, Signal};
use crate::db::LocalStore;

use super::loop_worker::capture_loop;
use super::sampler::ContextSampler;

const SIGNAL_BUFFER: usize = 64;

/// Owns the capture loop task: starts it, feeds it signals, stops it.
pub struct RecorderController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    signal_tx: Option<mpsc::Sender<Signal>>,
    state_rx: watch::Receiver<CaptureState>,
    state_tx: watch::Sender<CaptureState>,
}

impl RecorderController {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(CaptureState::Stopped);
        Self {
            handle: None,
            cancel_token: None,
            signal_tx: None,
            state_rx,
            state_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Recovers sessions a previous run left open, then spawns the loop.
    pub async fn start(
        &mut self,
        store: Arc<dyn LocalStore>,
        sampler: Arc<dyn ContextSampler>,
        config: CaptureConfig,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("recorder already running");
        }

        let recovered = store
            .close_orphaned()
            .await
            .context("failed to recover sessions left open by a previous run")?;
        for session in &recovered {
            warn!(
                "Recovered open session {} ({}); closed after {}ms",
                session.id, session.app.name, session.duration_ms
            );
        }

        let recorder = SessionRecorder::restore(store, config).await?;
        let cancel_token = CancellationToken::new();
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);

        let handle = tokio::spawn(capture_loop(
            recorder,
            sampler,
            signal_rx,
            self.state_tx.clone(),
            cancel_token.clone(),
        ));

        info!("Recorder started");
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.signal_tx = Some(signal_tx);
        Ok(())
    }

    pub async fn signal(&self, signal: Signal) -> Result<()> {
        let sender = self
            .signal_tx
            .as_ref()
            .ok_or_else(|| anyhow!("recorder is not running"))?;
        sender
            .send(signal)
            .await
            .map_err(|_| anyhow!("capture loop is gone"))
    }

    pub fn state(&self) -> CaptureState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
        self.state_rx.clone()
    }

    /// Cancels the loop and waits for it to finalize the open session.
    pub async fn stop(&mut self) -> Result<()> {
        self.signal_tx = None;
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("capture loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for RecorderController {
    fn default() -> Self {
        Self::new()
    }
}
