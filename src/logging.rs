//! Diagnostic tracing for gauntlet.
//!
//! Tracing output always goes to stderr. Stdout is reserved for command
//! output, and for `gauntlet stop-hook` it carries the JSON envelope the agent
//! runtime parses, so nothing else may be written there.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable that overrides `RUST_LOG` for gauntlet.
pub const LOG_ENV: &str = "GAUNTLET_LOG";

/// Initialize the tracing subscriber.
///
/// Filter precedence: `GAUNTLET_LOG`, then `RUST_LOG`, then `debug` when
/// `verbose` is set, otherwise `warn`.
pub fn init(verbose: bool) {
    let default_level = if verbose { "gauntlet=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // A second init (tests, embedding) is not an error worth surfacing.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
