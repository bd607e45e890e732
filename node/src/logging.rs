//! # Structured Logging
//!
//! Sets up the global `tracing` subscriber. Output goes to stderr so the
//! `sign` subcommand can print a bare signature on stdout.
//!
//! `RUST_LOG` wins over [`DEFAULT_FILTER`] when set:
//!
//! ```text
//! RUST_LOG=arcadepay_ledger=debug,tower_http=debug
//! ```

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter applied when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "arcadepay_node=info,arcadepay_ledger=info,tower_http=info";

/// Log output format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines with file and line numbers.
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Resolves the filter: `RUST_LOG` if present, otherwise `fallback`.
fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(fallback: &str, format: LogFormat) -> anyhow::Result<()> {
    let output = match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter(fallback))
        .with(output)
        .try_init()?;

    tracing::debug!(?format, "logging initialized");
    Ok(())
}
