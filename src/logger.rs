//! Logging infrastructure for relaypath-rs.
//!
//! Built on the tracing ecosystem. Output goes to stdout with ANSI colors, or
//! to an append-mode file through a non-blocking writer.
//!
//! # Log Levels
//!
//! | Level | Description | Use Case |
//! |-------|-------------|----------|
//! | [`Debug`](crate::LogLevel::Debug) | Candidate filtering, cache decisions | Development only |
//! | [`Info`](crate::LogLevel::Info) | Pool sizes, hops, attempts | Verbose operation |
//! | [`Notice`](crate::LogLevel::Notice) | Startup and results | Default level |
//! | [`Warn`](crate::LogLevel::Warn) | Fallbacks, stale hops, failed attempts | Potential issues |
//! | [`Error`](crate::LogLevel::Error) | Exhausted retries | Failures |
//!
//! `RUST_LOG` overrides the configured level.
//!
//! # Example
//!
//! ```rust,no_run
//! use relaypath::{LogLevel, logger};
//!
//! logger::init(LogLevel::Notice, None).unwrap();
//! logger::plog(LogLevel::Notice, "relaypath started");
//!
//! // Or to a file
//! logger::init(LogLevel::Debug, Some("/var/log/relaypath.log")).unwrap();
//! ```

use std::sync::OnceLock;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;
use crate::error::{Error, Result};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Keeps the background file writer alive for the life of the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the logging system.
///
/// Subsequent calls are no-ops.
///
/// * `logfile` - `None` logs to stdout, `Some(path)` appends to `path`
///
/// # Errors
///
/// Returns [`Error::Io`] if the log file cannot be opened, or
/// [`Error::Config`] if another global subscriber is already installed.
pub fn init(level: LogLevel, logfile: Option<&str>) -> Result<()> {
    if LOGGER_INITIALIZED.get().is_some() {
        return Ok(());
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

    match logfile {
        None => {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_thread_ids(false)
                .with_span_events(FmtSpan::NONE)
                .with_ansi(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| Error::Config(format!("failed to set logger: {}", e)))?;
        }
        Some(path) => {
            init_file_logger(path, env_filter)?;
        }
    }

    LOGGER_INITIALIZED.get_or_init(|| ());
    Ok(())
}

/// The `EnvFilter` directive for a configured level. Notice has no tracing
/// counterpart and maps to `info`.
fn filter_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Notice => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn init_file_logger(path: &str, env_filter: EnvFilter) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_ansi(false)
        .with_writer(writer)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("failed to set logger: {}", e)))?;

    let _ = FILE_GUARD.set(guard);
    Ok(())
}

/// Log a message at the specified level.
///
/// | LogLevel | tracing macro |
/// |----------|---------------|
/// | Debug | `debug!` |
/// | Info | `info!` |
/// | Notice | `info!` |
/// | Warn | `warn!` |
/// | Error | `error!` |
///
/// ```rust
/// use relaypath::{LogLevel, logger};
///
/// logger::plog(LogLevel::Notice, "Snapshot loaded");
/// logger::plog(LogLevel::Warn, "No exit relays found");
/// ```
pub fn plog(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => debug!("{}", message),
        LogLevel::Info => info!("{}", message),
        LogLevel::Notice => info!("{}", message),
        LogLevel::Warn => warn!("{}", message),
        LogLevel::Error => error!("{}", message),
    }
}

/// Log a formatted message at the specified level.
///
/// ```rust
/// use relaypath::{LogLevel, plog_fmt};
///
/// plog_fmt!(LogLevel::Info, "Entry pool: {} relays", 12);
/// ```
#[macro_export]
macro_rules! plog_fmt {
    ($level:expr, $($arg:tt)*) => {
        $crate::logger::plog($level, &format!($($arg)*))
    };
}
