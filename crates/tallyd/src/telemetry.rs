//! Tracing initialization for `tallyd`.
//!
//! Human-readable logs on stderr, filtered by `RUST_LOG` when set and by the
//! configured level otherwise.

use tracing_subscriber::EnvFilter;

/// Build the level filter: `RUST_LOG` wins over the configured level.
fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the tracing subscriber.
///
/// Call this once at startup, before any `tracing` events are emitted.
pub fn init(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr)
        .init();
}
