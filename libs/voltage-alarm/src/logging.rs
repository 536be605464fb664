//! Logging bootstrap for processes embedding the engine

use crate::config::LoggingConfig;
use crate::error::{AlarmEngineError, Result};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// `2024-01-01T00:00:00.000000Z [INFO ] message`
struct BracketedLevelFormat;

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO ]",
        Level::WARN => "[WARN ]",
        Level::ERROR => "[ERROR]",
    }
}

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;
        write!(writer, "{} ", format_level(event.metadata().level()))?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    // RUST_LOG wins over the configured level
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| AlarmEngineError::config(format!("Invalid log level: {}", e))),
    }
}

/// Install the global subscriber
///
/// Returns `Ok(false)` when a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let filter = build_filter(config)?;
    let layer = if config.json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer().event_format(BracketedLevelFormat).boxed()
    };
    Ok(tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .is_ok())
}
