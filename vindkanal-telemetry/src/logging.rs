//! ## vindkanal-telemetry::logging
//! **tracing-subscriber bootstrap**
//!
//! Structured logging for the link worker and the management plane.
//! `RUST_LOG` overrides the default `info` filter.

use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    pub fn init() {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_thread_names(true)
            .init()
    }

    /// Init variant that tolerates an already-installed subscriber, for
    /// tests that share a process.
    pub fn try_init() {
        let _ = fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_thread_names(true)
            .try_init();
    }
}
