mod controller;
mod loop_worker;
mod sampler;

pub use controller::RecorderController;
pub use loop_worker::capture_loop;
pub use sampler::{parse_context, CommandSampler, ContextSampler, SamplingError, PERMISSION_DENIED_EXIT_CODE};
