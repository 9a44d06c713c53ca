//! Logging setup for the relay server.
//!
//! Metrics are recorded through the `opentelemetry` global meter inside
//! `parley-relay`; without an installed provider they are no-ops.

use clap::ValueEnum;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,parley_relay=debug,parley_server=debug";

/// Console log format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global tracing subscriber.
///
/// # Configuration
///
/// Environment variables:
/// - `RUST_LOG`: Log filter (default: [`DEFAULT_FILTER`])
pub fn init(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match format {
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true);
            tracing_subscriber::registry()
                .with(filter())
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true);
            tracing_subscriber::registry()
                .with(filter())
                .with(fmt_layer)
                .try_init()?;
        }
    }

    tracing::info!(format = ?format, "Telemetry initialized");
    Ok(())
}
