//! Process logger configuration for the deploy CLI.
use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::Context;
use anyhow::Result;
use clap::Args;
use clap::ValueEnum;
use slog::o;
use slog::Drain;
use slog::Logger;

/// Enumerate valid log verbosity levels.
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
        }
    }
}

impl From<LogLevel> for slog::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Critical => slog::Level::Critical,
            LogLevel::Error => slog::Level::Error,
            LogLevel::Warning => slog::Level::Warning,
            LogLevel::Info => slog::Level::Info,
            LogLevel::Debug => slog::Level::Debug,
        }
    }
}

/// Logging-related options.
#[derive(Args, Debug)]
pub struct LogOpt {
    /// If provided, logs will be emitted to this file as JSON events.
    #[arg(long = "log-file", name = "log-file", global = true)]
    file: Option<String>,

    /// Verbosity level for emitted logs.
    #[arg(
        long = "log-level", global = true,
        default_value_t = LogLevel::Info,
    )]
    level: LogLevel,
}

/// Initialise a logger based on the given CLI arguments.
///
/// Logs go to a JSON file when `--log-file` is set, to the terminal when
/// `debug` is requested, and nowhere otherwise.
pub fn configure(opt: &LogOpt, debug: bool) -> Result<Logger> {
    let level = opt.level.clone().into();
    match &opt.file {
        Some(file) => json_file(file, level),
        None if debug => Ok(term(level)),
        None => Ok(null()),
    }
}

/// A logger to discard all messages.
pub fn null() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// A logger to write human-readable events to stderr.
pub fn term(level: slog::Level) -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build();
    let drain = Mutex::new(drain).ignore_res();
    let drain = LevelFilter(drain, level);
    Logger::root(drain, o!())
}

/// A logger to write JSON encoded events to a file.
fn json_file(path: &str, level: slog::Level) -> Result<Logger> {
    let writer = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Unable to open log file at {}", path))?;
    let drain = slog_json::Json::new(writer)
        .set_newlines(true)
        .set_flush(true)
        .set_pretty(false)
        .add_default_keys()
        .build();
    let drain = Mutex::new(drain).ignore_res();
    let drain = LevelFilter(drain, level);
    Ok(Logger::root(drain, o!()))
}

/// Alternative implementation of slog's `LevelFilter` with `Ok == ()`.
///
/// The default `LevelFilter` implementation wraps `D::Ok` into an `Option`,
/// which makes it impossible to wrap a filtering drain into a `Logger`.
#[derive(Debug, Clone)]
struct LevelFilter<D: Drain>(pub D, pub slog::Level);
impl<D: Drain> Drain for LevelFilter<D> {
    type Ok = ();
    type Err = D::Err;
    fn log(
        &self,
        record: &slog::Record,
        logger_values: &slog::OwnedKVList,
    ) -> std::result::Result<Self::Ok, Self::Err> {
        if record.level().is_at_least(self.1) {
            self.0.log(record, logger_values)?;
        }
        Ok(())
    }
}
