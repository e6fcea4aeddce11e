mod client;
mod transport;
mod worker;

pub use client::{HttpIngestClient, IngestClient, TransportError};
pub use transport::{SyncOutcome, SyncTransport};
pub use worker::{sync_loop, SyncController};
