use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::json;
use uuid::Uuid;

use crate::db::{Database, Schema};
use crate::metrics::{DrainMetrics, MetricsSnapshot};
use crate::models::{SyncAccepted, SyncRequest, SESSIONS_PATH};
use crate::settings::ServerSettings;

use super::auth::{bearer_token, CredentialResolver, Identity, StaticCredentials};
use super::error::IngestError;
use super::queue::{IngestionQueue, QueuedRecord};
use super::store::SqliteDurableStore;
use super::validate::validate_batch;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Request bodies above this are refused before they are parsed.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Shared state for the ingest handlers.
#[derive(Clone)]
pub struct IngestState {
    pub queue: IngestionQueue,
    pub credentials: Arc<dyn CredentialResolver>,
    pub metrics: DrainMetrics,
    pub max_request_sessions: usize,
    pub eager_drain_threshold: u64,
}

pub fn build_router(state: IngestState) -> Router {
    let authenticated = middleware::from_fn_with_state(state.clone(), require_identity);

    Router::new()
        .route(
            SESSIONS_PATH,
            post(submit_sessions).route_layer(authenticated),
        )
        .route("/v1/health", get(health))
        .route("/v1/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Resolves the bearer token before the body is read, so an unauthenticated
/// caller gets a 401 whatever it sends.
async fn require_identity(
    State(state): State<IngestState>,
    mut request: Request,
    next: Next,
) -> Result<Response, IngestError> {
    let identity = bearer_token(request.headers())
        .and_then(|token| state.credentials.resolve(token))
        .ok_or(IngestError::Unauthorized)?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Accepts a batch as soon as it is validated and queued; durability comes
/// later from the drain.
async fn submit_sessions(
    State(state): State<IngestState>,
    Extension(identity): Extension<Identity>,
    body: Bytes,
) -> Result<(StatusCode, Json<SyncAccepted>), IngestError> {
    let request: SyncRequest = serde_json::from_slice(&body)
        .map_err(|err| IngestError::Validation(format!("malformed batch: {err}")))?;
    validate_batch(&request.sessions, state.max_request_sessions)?;

    let accepted = request.sessions.len();
    let records = request
        .sessions
        .into_iter()
        .map(|session| QueuedRecord {
            session,
            account_id: identity.account_id.clone(),
            device_id: identity.device_id.clone(),
        })
        .collect();
    state.queue.enqueue(records);
    let pending = state.queue.pending();

    if pending >= state.eager_drain_threshold && !state.queue.is_draining() {
        state.queue.spawn_drain();
    }

    let sync_id = Uuid::new_v4().to_string();
    log_debug!(
        "accepted {} sessions from {}/{} (sync {}, pending {})",
        accepted,
        identity.account_id,
        identity.device_id,
        sync_id,
        pending
    );

    Ok((StatusCode::ACCEPTED, Json(SyncAccepted { accepted, sync_id })))
}

async fn health(State(state): State<IngestState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "pending": state.queue.pending(),
    }))
}

async fn metrics(State(state): State<IngestState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.get_snapshot(state.queue.counters()).await)
}

/// Runs the ingest server until ctrl-c, then stops the periodic drain and
/// flushes what is still queued.
pub async fn run_server(settings: ServerSettings) -> Result<()> {
    let credentials = StaticCredentials::new(settings.credentials.clone());
    if credentials.is_empty() {
        log_warn!("no credentials configured; every ingest request will be rejected");
    }

    let db = Database::new(settings.db_path.clone(), Schema::Ingest)?;
    let store = SqliteDurableStore::new(db, settings.param_ceiling)?;
    let queue = IngestionQueue::new(Arc::new(store))?;
    let metrics = DrainMetrics::new();
    let follower = metrics.follow(&queue);
    queue.start(Duration::from_millis(settings.drain_interval_ms.max(1)));

    let state = IngestState {
        queue: queue.clone(),
        credentials: Arc::new(credentials),
        metrics,
        max_request_sessions: settings.max_request_sessions,
        eager_drain_threshold: settings.eager_drain_threshold,
    };

    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind))?;
    log_info!(
        "ingest server listening on http://{} (batch size {})",
        settings.bind,
        queue.batch_size()
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("ingest server failed")?;

    if let Some(report) = queue.shutdown_and_flush().await {
        log_info!(
            "final drain wrote {} records ({} failed)",
            report.drained,
            report.failed
        );
    }
    follower.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log_error!("failed to listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
    log_info!("shutdown requested");
}
