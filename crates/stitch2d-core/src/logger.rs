//! Stderr logger for batch runs.
//!
//! Records are printed as `[elapsed LEVEL module] message`, where `module`
//! is the record target with the `stitch2d` crate prefix shortened. Install
//! it once at startup with [`init_with_level`]; with the `tracing` feature,
//! [`init_tracing`] installs a `tracing-subscriber` instead.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl StderrLogger {
    fn module<'a>(target: &'a str) -> &'a str {
        target
            .strip_prefix("stitch2d_")
            .or_else(|| target.strip_prefix("stitch2d::"))
            .unwrap_or(target)
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:8.3}s {:>5} {}] {}",
            self.started.elapsed().as_secs_f64(),
            record.level(),
            Self::module(record.target()),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger with the given level filter.
///
/// Only the first call installs anything; later calls are no-ops.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StderrLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Parse a level name (`off`, `error`, `warn`, `info`, `debug`, `trace`),
/// case-insensitively.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    name.trim().parse().ok()
}

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Span close events are emitted so the instrumented stages report their
/// duration.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder.compact().finish().try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_prefix_is_shortened() {
        assert_eq!(StderrLogger::module("stitch2d_core::stitch"), "core::stitch");
        assert_eq!(StderrLogger::module("other::path"), "other::path");
    }

    #[test]
    fn level_names_parse() {
        assert_eq!(parse_level("warn"), Some(LevelFilter::Warn));
        assert_eq!(parse_level(" DEBUG "), Some(LevelFilter::Debug));
        assert_eq!(parse_level("loud"), None);
    }
}
