//! Tracing bootstrap shared by every Flotilla process.

use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber. `RUST_LOG` wins over `default_directive`.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    // A second init (tests, embedded use) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
