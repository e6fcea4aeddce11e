pub mod agent;
pub mod capture;
pub mod db;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod sensing;
pub mod settings;
pub mod sync;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use agent::run_agent;
pub use ingest::run_server;

/// Initialises `env_logger` at `Info` unless `RUST_LOG` says otherwise.
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}
