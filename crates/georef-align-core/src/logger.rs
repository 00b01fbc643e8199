//! stderr logging for the alignment service.
//!
//! Lines look like `  12.345 WARN  pipeline: message`: seconds since the
//! logger was installed, the level, and the last path segment of the
//! emitting module. Continuation lines of multi-line messages (solver
//! reports) are indented under the message column.

use std::fmt::Arguments;
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::prelude::*;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used by [`init_tracing`] when `RUST_LOG` is unset.
#[cfg(feature = "tracing")]
pub const DEFAULT_TRACING_FILTER: &str = "warn,georef_align=info,georef_align_core=info";

struct AlignmentLogger {
    level: LevelFilter,
    started: Instant,
}

fn module_name(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

fn format_line(elapsed: f64, level: Level, target: &str, args: &Arguments<'_>) -> String {
    let prefix = format!("{elapsed:8.3} {level:<5} {}: ", module_name(target));
    let indent = " ".repeat(prefix.len());
    let body = args.to_string();
    let mut line = prefix;
    for (i, part) in body.lines().enumerate() {
        if i > 0 {
            line.push('\n');
            line.push_str(&indent);
        }
        line.push_str(part);
    }
    line.push('\n');
    line
}

impl Log for AlignmentLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(
            self.started.elapsed().as_secs_f64(),
            record.level(),
            record.target(),
            record.args(),
        );
        // One write per record so concurrent solves don't interleave.
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<AlignmentLogger> = OnceLock::new();

/// Install the stderr logger at `level`. Later calls are ignored.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| AlignmentLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Install a `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` overrides [`DEFAULT_TRACING_FILTER`]. `json = true` selects
/// flattened JSON lines for log shippers; otherwise text with an uptime
/// timer. Closing `solve` spans report how long each solve held the
/// estimator. A subscriber that is already installed is kept.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TRACING_FILTER));
    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_timer(fmt::time::Uptime::default())
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
    });
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_a_no_op() {
        init_with_level(LevelFilter::Warn).expect("first init");
        init_with_level(LevelFilter::Debug).expect("second init is ignored");
        log::warn!("logger installed");
    }

    #[test]
    fn line_names_the_emitting_module() {
        let line = format_line(
            1.5,
            Level::Warn,
            "georef_align::estimator::pipeline",
            &format_args!("solve did not converge"),
        );
        assert_eq!(line, "   1.500 WARN  pipeline: solve did not converge\n");
    }

    #[test]
    fn report_lines_are_indented_under_the_message() {
        let line = format_line(
            0.0,
            Level::Info,
            "solver",
            &format_args!("summary\niterations: 3"),
        );
        let mut lines = line.lines();
        let first = lines.next().unwrap();
        let second = lines.next().unwrap();
        let column = first.find("summary").unwrap();
        assert_eq!(&second[..column], " ".repeat(column));
        assert_eq!(&second[column..], "iterations: 3");
        assert!(lines.next().is_none());
    }
}
