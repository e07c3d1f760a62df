//! Logging utilities for bridge-wide output.
//!

// Re-exports for convenience
pub use tracing::metadata::LevelFilter;
pub use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{util::SubscriberInitExt, Layer};

/// Set up logging for a host process.
///
/// With `debugging` enabled the reconcilers log every delta they compute;
/// `RUST_LOG` can still narrow or widen individual targets.
pub fn setup(debugging: bool) {
    let env = std::env::var("RUST_LOG").unwrap_or_else(|_| "rolebridge_core=info".into());
    let mut logging_layers = vec![tracing_subscriber::EnvFilter::new(env).boxed()];

    let level = if debugging {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    logging_layers.push(tracing_subscriber::fmt::layer().with_filter(level).boxed());

    tracing_subscriber::registry().with(logging_layers).init();

    debug!("logging set up");
}
