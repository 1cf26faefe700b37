pub mod config;
pub mod env_manager;
pub mod error;
pub mod job;
pub mod lock;
pub mod log_sanitize;
pub mod paths;
pub mod process;
pub mod run_log;
pub mod schedule;
pub mod wrapper;

pub use error::{Error, Result};

/// Diagnostics on stderr, filtered by `RUST_LOG` (default `warn`).
/// The run log itself is written by [`run_log::RunLog`], not by tracing.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
