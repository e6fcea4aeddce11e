//! Request/response bodies of the ingestion HTTP contract.

use serde::{Deserialize, Serialize};

use super::session::FocusSession;

/// Hard upper bound on sessions per request, shared by client and endpoint.
pub const MAX_BATCH_SESSIONS: usize = 1000;

/// Route the agent posts closed sessions to.
pub const SESSIONS_PATH: &str = "/v1/sessions";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub sessions: Vec<FocusSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncAccepted {
    pub accepted: usize,
    pub sync_id: String,
}
