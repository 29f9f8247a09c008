//! Tracing subscriber setup shared by the server binary and tests.

use std::env;
use std::str::FromStr;

use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` controls the filter (default `info`) and `LOG_FORMAT=json`
/// switches to line-delimited JSON output. Calling this twice keeps the
/// existing subscriber.
pub fn configure_logging() -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::from_str(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stdout);

    let as_json = env::var("LOG_FORMAT").is_ok_and(|format| format == "json");
    let result = if as_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        warn!("Logging already initialized, keeping existing subscriber: {e}");
    }

    Ok(())
}
