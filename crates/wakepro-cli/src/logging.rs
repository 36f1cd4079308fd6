//! Logging setup with daily rotation and cleanup
//!
//! Always logs to stderr; with a log directory, also to a daily file. Files
//! older than 7 days are removed on start.

use anyhow::Result;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_RETENTION_DAYS: u64 = 7;
const LOG_PREFIX: &str = "wakepro";

/// Keeps the file writer flushing; drop it only at exit.
pub struct LoggingGuard {
    _guard: Option<WorkerGuard>,
}

fn filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

pub fn init_logging(log_dir: Option<&Path>, log_level: &str) -> Result<LoggingGuard> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(filter(log_level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let removed = cleanup_old_logs(dir, SystemTime::now())?;
            let appender = tracing_appender::rolling::daily(dir, format!("{}.log", LOG_PREFIX));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true)
                .with_filter(filter(log_level));
            if removed > 0 {
                eprintln!("Cleaned up {} old log file(s)", removed);
            }
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LoggingGuard { _guard: guard })
}

/// Deletes `wakepro*` log files last modified before the retention cutoff.
fn cleanup_old_logs(log_dir: &Path, now: SystemTime) -> Result<usize> {
    let cutoff = now
        .checked_sub(Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut deleted = 0;
    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(LOG_PREFIX) && n.contains(".log"));
        if !is_log {
            continue;
        }
        if entry.metadata()?.modified()? < cutoff {
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => eprintln!("Failed to delete old log {}: {}", path.display(), e),
            }
        }
    }
    Ok(deleted)
}
