//! Tracing subscriber setup for the server binary and embedders.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const CRATES: [&str; 5] = [
    "parley",
    "parley_transport",
    "parley_protocol",
    "parley_session",
    "parley_room",
];

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_level` for the Parley crates when it is unset or invalid.
///
/// Does nothing if a global subscriber is already installed.
///
/// ```no_run
/// parley::logging::init_tracing("debug");
/// ```
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(default_level)));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

fn default_directives(level: &str) -> String {
    CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}
