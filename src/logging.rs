//! Log output for the `mpworker` binary
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the application. An execution context inherits the subscriber of the
//! process that forked it, so its fatal-exit event lands in the same stream.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset: this crate's lifecycle events, warnings from the rest
const DEFAULT_FILTER: &str = "warn,mpworker=info";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install a stderr subscriber once per process.
///
/// Later calls, or a subscriber installed by someone else, leave things as they are.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        // stdout is reserved for the demo's run output
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
        assert!(TRACING_INIT.get().is_some());
    }
}
