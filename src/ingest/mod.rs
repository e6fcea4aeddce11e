//! Server side: authenticated batch endpoint, in-memory queue and the
//! bounded-batch writer into the durable store.

pub mod auth;
pub mod error;
pub mod queue;
pub mod server;
pub mod store;
pub mod validate;
pub mod writer;

pub use auth::{bearer_token, Credential, CredentialResolver, Identity, StaticCredentials};
pub use error::{ErrorBody, ErrorDetail, IngestError};
pub use queue::{BatchOutcome, DrainReport, IngestionQueue, QueueCounters, QueuedRecord};
pub use server::{build_router, run_server, IngestState, MAX_BODY_BYTES};
pub use store::{DurableStore, SqliteDurableStore, StoreError, DEFAULT_PARAM_CEILING};
pub use validate::validate_batch;
pub use writer::{max_batch_size, upsert_statement, write_batch, SESSION_COLUMNS};
