pub mod context;
pub mod session;
pub mod wire;

pub use context::{ContextChange, ContextSnapshot};
pub use session::{AppIdentity, FocusSession, SessionStatus};
pub use wire::{SyncAccepted, SyncRequest, MAX_BATCH_SESSIONS, SESSIONS_PATH};
