//! Logging initialization and span helpers.
//!
//! Every binary calls [`init_logging`] once at startup; library code only
//! emits `tracing` events and uses the span helpers below so that catalog and
//! refresh activity carries consistent fields.

use std::str::FromStr;
use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Error;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs.
    Json,
    /// Human-readable logs.
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(Error::InvalidInput(format!(
                "log format must be one of: pretty, json (got {other})"
            ))),
        }
    }
}

/// Initializes the global subscriber.
///
/// Honors `RUST_LOG` (default `info`). Logs go to stderr so that command
/// output on stdout stays machine-readable. Calling it again is a no-op.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .try_init();
            }
            LogFormat::Pretty => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().compact().with_writer(std::io::stderr))
                    .try_init();
            }
        }
    });
}

/// Creates a span for a catalog operation on one table.
///
/// ```rust
/// use medallion_core::observability::catalog_span;
///
/// let span = catalog_span("replace_snapshot", "gold.mart_regional_analytics");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn catalog_span(operation: &str, table: &str) -> Span {
    tracing::info_span!("catalog", op = operation, table = table)
}

/// Creates a span covering one refresh cycle.
#[must_use]
pub fn refresh_span(cycle_id: &str) -> Span {
    tracing::info_span!("refresh", cycle_id = cycle_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn log_format_parses() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn spans_can_be_entered() {
        let span = refresh_span("01HZX");
        let _guard = span.enter();
        tracing::info!("inside refresh span");
    }
}
