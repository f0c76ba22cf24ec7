//! Tracing subscriber setup for the binary.
//!
//! Logs go to stderr so stdout stays reserved for the JSON reply.
//! Debug mode can be enabled with `--debug` or `NAVIGATOR_DEBUG=1`;
//! `RUST_LOG` overrides both.

use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const DEBUG_ENV: &str = "NAVIGATOR_DEBUG";

/// Whether `NAVIGATOR_DEBUG` asks for debug logging.
pub fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Default filter directive for the chosen mode.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "navigator=debug,info"
    } else {
        "navigator=info,warn"
    }
}

/// Install the global subscriber. Calling it twice is harmless.
pub fn init(debug: bool) {
    let debug = debug || env_debug();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(debug))
        .try_init();
}
