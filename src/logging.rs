//! Tracing setup for the worker.
//!
//! Events go to stdout through a compact formatter and to a log file through a non-blocking
//! writer. `MEDCOMPRESS_LOG_FILE` pins the file to an explicit path that is appended to;
//! without it a daily-rotated `logs/medcompress.log.<date>` is used, since the worker is
//! usually left running across days.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_ENV: &str = "MEDCOMPRESS_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_PREFIX: &str = "medcompress.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where the file layer writes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogDestination {
    /// Single file named by the operator.
    Explicit(PathBuf),
    /// Daily rotation inside the default directory.
    Rotating { dir: PathBuf, prefix: String },
}

impl LogDestination {
    fn from_env() -> Self {
        match std::env::var(LOG_FILE_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::Explicit(PathBuf::from(path)),
            _ => Self::Rotating {
                dir: PathBuf::from(DEFAULT_LOG_DIR),
                prefix: DEFAULT_LOG_PREFIX.to_string(),
            },
        }
    }
}

/// Install the global tracing subscriber.
///
/// `default_level` applies when `RUST_LOG` is unset, so `--verbose` on the CLI can raise it
/// without overriding an explicit filter.
pub fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    match open_file_writer(&LogDestination::from_env()) {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

/// Returns `None` when the destination cannot be opened; stdout logging still works then.
fn open_file_writer(destination: &LogDestination) -> Option<NonBlocking> {
    let (writer, guard) = match destination {
        LogDestination::Explicit(path) => {
            let file = match open_append(path) {
                Ok(file) => file,
                Err(err) => {
                    eprintln!("Failed to open log file {}: {err}", path.display());
                    return None;
                }
            };
            tracing_appender::non_blocking(file)
        }
        LogDestination::Rotating { dir, prefix } => {
            if let Err(err) = std::fs::create_dir_all(dir) {
                eprintln!("Failed to create log directory {}: {err}", dir.display());
                return None;
            }
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, prefix))
        }
    };
    let _ = LOG_GUARD.set(guard);
    Some(writer)
}

fn open_append(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}
