//! Tracing subscriber setup for the CLI.
//!
//! Console output goes through `tracing-indicatif` so segment progress bars
//! and log lines do not overwrite each other. An optional log directory adds
//! a daily-rolling plain-text file.

use std::path::Path;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::AppError;

/// Default filter directive when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "hlsmux=info,hlsmux_engine=info";

/// Filter used with `--verbose`.
pub const VERBOSE_LOG_FILTER: &str = "hlsmux=debug,hlsmux_engine=debug";

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

fn build_filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new(VERBOSE_LOG_FILTER);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer; keep it alive until exit.
pub fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, AppError> {
    let indicatif_layer = IndicatifLayer::new();

    let console_layer = fmt::layer()
        .with_ansi(true)
        .with_timer(LocalTimer)
        .with_writer(indicatif_layer.get_stderr_writer());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "hlsmux.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter(verbose))
        .with(console_layer)
        .with(file_layer)
        .with(indicatif_layer)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_overrides_default_filter() {
        let filter = build_filter(true).to_string();
        assert!(filter.contains("hlsmux=debug"));
        assert!(filter.contains("hlsmux_engine=debug"));
    }
}
