use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

pub const LOG_FILE_NAME: &str = "startup-accelerator.log";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot create log directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("cannot install log subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Log to a daily rolling file (never stdout). Keep the guard alive for as
/// long as logs should be flushed.
pub fn init(log_dir: &Path) -> Result<WorkerGuard, LoggingError> {
    fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDir {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("startup_accelerator=info"));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(filter)
        .finish()
        .try_init()?;

    Ok(guard)
}

pub fn default_log_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "startup-accelerator")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("startup-accelerator"))
}
