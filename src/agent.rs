use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::capture::{CaptureState, Signal};
use crate::db::{Database, LocalStore, Schema};
use crate::sensing::{CommandSampler, RecorderController};
use crate::settings::AgentSettings;
use crate::sync::{HttpIngestClient, SyncController, SyncTransport};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Runs capture and sync until ctrl-c or until the signal helper closes
/// stdin. Signals arrive one per line (`input`, `lock`, `wake`, ...).
pub async fn run_agent(settings: AgentSettings) -> Result<()> {
    let sampler = CommandSampler::from_argv(&settings.sampler_command)
        .context("samplerCommand is empty; point it at the context helper")?;

    let db = Database::new(settings.db_path.clone(), Schema::Agent)?;
    let store: Arc<dyn LocalStore> = Arc::new(db);

    let mut recorder = RecorderController::new();
    recorder
        .start(store.clone(), Arc::new(sampler), settings.capture.clone())
        .await?;

    let mut sync = SyncController::new();
    if settings.token.is_empty() {
        log_warn!("no sync token configured; sessions stay on this device");
    } else {
        let client = HttpIngestClient::new(
            &settings.endpoint,
            &settings.token,
            Duration::from_secs(settings.request_timeout_secs.max(1)),
        )?;
        log_info!("syncing to {} every {}s", client.url(), settings.sync_interval_secs);
        let transport = SyncTransport::new(store.clone(), Arc::new(client), settings.batch_size);
        sync.start(transport, Duration::from_secs(settings.sync_interval_secs.max(1)))?;
    }

    let mut states = recorder.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match line.parse::<Signal>() {
                    Ok(signal) => recorder.signal(signal).await?,
                    Err(err) => log_warn!("ignoring signal line: {}", err),
                },
                Ok(None) => {
                    log_info!("signal input closed");
                    break;
                }
                Err(err) => {
                    log_error!("failed to read signal input: {}", err);
                    break;
                }
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state: CaptureState = *states.borrow_and_update();
                log_info!("capture state: {:?}", state);
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    log_error!("failed to listen for ctrl-c: {}", err);
                }
                break;
            }
        }
    }

    // Stop capture first so the session it closes goes out with the final sync.
    recorder.stop().await?;
    sync.stop().await?;
    log_info!("agent stopped");
    Ok(())
}
