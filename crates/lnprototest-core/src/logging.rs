//! Tracing subscriber setup shared by the daemon and the CLI.
//!
//! `RUST_LOG` always wins over the configured level; `-v` flags raise the
//! configured level one step each.

use tracing_subscriber::EnvFilter;

/// Pick the default filter from the configured level and the `-v` count.
///
/// `-v` asks for at least `debug`, `-vv` for `trace`; a configured level that
/// is already as verbose is kept.
pub fn default_filter(configured: &str, verbose: u8) -> String {
    let requested = match verbose {
        0 => return configured.to_string(),
        1 => "debug",
        _ => "trace",
    };
    match (verbosity(configured), verbosity(requested)) {
        (Some(have), Some(want)) if have >= want => configured.to_string(),
        _ => requested.to_string(),
    }
}

fn verbosity(level: &str) -> Option<u8> {
    match level.trim().to_ascii_lowercase().as_str() {
        "off" => Some(0),
        "error" => Some(1),
        "warn" => Some(2),
        "info" => Some(3),
        "debug" => Some(4),
        "trace" => Some(5),
        _ => None,
    }
}

/// Install the global fmt subscriber, writing to stderr so that command
/// output on stdout stays machine-readable. Returns `false` if a subscriber
/// was already installed, in which case nothing changes.
pub fn init(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
