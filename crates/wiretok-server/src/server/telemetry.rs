//! Log output for the server process.
//!
//! Events go through a `tracing_subscriber` registry filtered by `RUST_LOG`
//! (default `info`). The console layer is either human-readable (`pretty`)
//! or one JSON object per line (`json`), both stamped with local RFC 3339
//! time, thread ids and source locations.

use crate::server::config::LogFormat;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let pretty = (format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(fmt::time::ChronoLocal::rfc_3339())
            .with_file(true)
            .pretty()
    });

    let json = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_line_number(true)
            .with_timer(fmt::time::ChronoLocal::rfc_3339())
            .with_file(true)
            .json()
            .flatten_event(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .try_init()?;

    Ok(())
}
