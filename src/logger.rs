//! Tracing setup for the swarm.
//!
//! The operator console owns stdout, so log output goes to stderr or to the
//! `log_file` from `[swarm]`.  [`init`] is called once from `main` after the
//! config and CLI flags are resolved.

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing_subscriber::{EnvFilter, fmt::writer::BoxMakeWriter};

use crate::error::AppError;

/// Where the chosen level came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSource {
    /// `-v` flags: beats `RUST_LOG`.
    Cli,
    /// `[swarm] log_level` or `ARALIYA_LOG_LEVEL`: `RUST_LOG` beats it.
    Config,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stderr,
    /// Appended to, no ANSI colours.
    File(PathBuf),
}

impl LogSink {
    pub fn from_option(path: Option<&Path>) -> Self {
        path.map_or(Self::Stderr, |p| Self::File(p.to_path_buf()))
    }
}

/// Pick the filter directive.  The preferred source wins when it parses;
/// the other one is tried as a fallback.
pub fn build_filter(level: &str, source: LevelSource) -> Result<EnvFilter, AppError> {
    let from_level = || EnvFilter::try_new(level);
    let from_env = EnvFilter::try_from_default_env;

    match source {
        LevelSource::Cli => from_level().or_else(|level_err| {
            from_env().map_err(|env_err| {
                AppError::Logger(format!(
                    "invalid log level '{level}': {level_err}; RUST_LOG parse failed: {env_err}"
                ))
            })
        }),
        LevelSource::Config => from_env()
            .or_else(|_| from_level())
            .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}"))),
    }
}

fn open_log_file(path: &Path) -> Result<File, AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::Logger(format!("cannot create {}: {e}", parent.display())))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AppError::Logger(format!("cannot open {}: {e}", path.display())))
}

/// Install the global subscriber.  Fails if one is already installed.
pub fn init(level: &str, source: LevelSource, sink: &LogSink) -> Result<(), AppError> {
    let filter = build_filter(level, source)?;

    let (writer, ansi) = match sink {
        LogSink::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
        LogSink::File(path) => (BoxMakeWriter::new(Mutex::new(open_log_file(path)?)), false),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(false)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}
