use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::capture::{Action, CaptureState, SessionRecorder, Signal};
use crate::utils::now_millis;

use super::sampler::{ContextSampler, SamplingError};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

/// How long to park while paused. Signals wake the loop immediately, so
/// this only bounds how stale the idle check can get.
const PAUSED_PARK_SECS: u64 = 60;

/// Drives a [`SessionRecorder`] from a signal channel and its own adaptive
/// fallback timer. Context reads happen inline, so at most one is ever in
/// flight. Returns after cancellation (or when every signal sender is
/// gone), with the open session finalized.
pub async fn capture_loop(
    mut recorder: SessionRecorder,
    sampler: Arc<dyn ContextSampler>,
    mut signals: mpsc::Receiver<Signal>,
    state_tx: watch::Sender<CaptureState>,
    cancel_token: CancellationToken,
) {
    let sample_timeout = Duration::from_millis(recorder.config().sample_timeout_ms);

    match recorder.start(now_millis()).await {
        Ok(Action::OpenFresh) => sample_into(&mut recorder, sampler.as_ref(), sample_timeout).await,
        Ok(_) => {}
        Err(err) => log_error!("failed to start recorder: {err:?}"),
    }
    state_tx.send_replace(recorder.state());

    loop {
        let wait = recorder
            .next_sample_in(now_millis())
            .unwrap_or(Duration::from_secs(PAUSED_PARK_SECS));

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                match recorder.poll_idle(now_millis()).await {
                    Ok(true) => {
                        state_tx.send_replace(recorder.state());
                        continue;
                    }
                    Ok(false) => {}
                    Err(err) => log_error!("idle transition failed: {err:?}"),
                }

                if recorder.state() == CaptureState::Active {
                    sample_into(&mut recorder, sampler.as_ref(), sample_timeout).await;
                }
            }
            received = signals.recv() => {
                let Some(signal) = received else {
                    log_info!("signal channel closed; stopping capture loop");
                    break;
                };

                match recorder.handle_signal(signal, now_millis()).await {
                    Ok(Action::OpenFresh | Action::Resample) => {
                        sample_into(&mut recorder, sampler.as_ref(), sample_timeout).await;
                    }
                    Ok(_) => {}
                    Err(err) => log_error!("failed to apply {signal:?}: {err:?}"),
                }
                state_tx.send_replace(recorder.state());
            }
            _ = cancel_token.cancelled() => {
                log_info!("capture loop shutting down");
                break;
            }
        }
    }

    if let Err(err) = recorder.stop(now_millis()).await {
        log_error!("failed to finalize session on stop: {err:?}");
    }
    state_tx.send_replace(recorder.state());
}

async fn sample_into(
    recorder: &mut SessionRecorder,
    sampler: &dyn ContextSampler,
    timeout: Duration,
) {
    let observed_at = now_millis();
    let sample = match tokio::time::timeout(timeout, sampler.sample()).await {
        Ok(result) => result,
        Err(_) => Err(SamplingError::Timeout),
    };

    match recorder.apply_sample(sample, observed_at).await {
        Ok(outcome) => log_debug!("sample at {observed_at}: {outcome:?}"),
        Err(err) => log_error!("failed to apply context sample: {err:?}"),
    }
}
