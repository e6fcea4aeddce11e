pub mod cadence;
pub mod config;
pub mod recorder;
pub mod state;

pub use cadence::SamplingCadence;
pub use config::CaptureConfig;
pub use recorder::{SampleOutcome, SessionRecorder};
pub use state::{transition, Action, CaptureState, Signal};
