//! Console and rolling file logging.
//!
//! Both outputs share one filter. Log files roll over daily and only the
//! last N days are kept. Library crates log through `log`, which is bridged
//! into the same subscriber.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Deserialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// Base name of the rolling log files.
const LOG_FILE_NAME: &str = "mythtv-live.log";

pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_RETENTION_DAYS: u64 = 7;

/// `[logging]` section of the config file.
#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
    /// Set to false to log to the file only.
    pub console: Option<bool>,
}

/// Logging options after merging flags with the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub retention_days: u64,
    pub level: String,
    pub console: bool,
}

impl LogSettings {
    /// Flags left at their defaults fall back to the config file.
    pub fn resolve(dir: &Path, retention_days: u64, verbose: bool, section: &LoggingSection) -> Self {
        let dir = match &section.log_dir {
            Some(configured) if dir == Path::new(DEFAULT_LOG_DIR) => PathBuf::from(configured),
            _ => dir.to_path_buf(),
        };
        let retention_days = match section.retention_days {
            Some(days) if retention_days == DEFAULT_RETENTION_DAYS => days,
            _ => retention_days,
        };
        let level = if verbose {
            "debug".to_string()
        } else {
            section.level.clone().unwrap_or_else(|| "info".to_string())
        };

        Self {
            dir,
            retention_days,
            level,
            console: section.console.unwrap_or(true),
        }
    }
}

/// Where a formatting layer writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    Console,
    File,
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(settings: &LogSettings) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(&settings.dir)?;
    clean_old_logs(&settings.dir, settings.retention_days)?;

    let appender = tracing_appender::rolling::daily(&settings.dir, LOG_FILE_NAME);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    // Flushes on drop; must outlive every log call.
    let _ = Box::leak(Box::new(guard));

    let mut layers = vec![format_layer(Sink::File, file_writer)];
    if settings.console {
        layers.push(format_layer(Sink::Console, io::stdout));
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let subscriber = tracing_subscriber::registry().with(layers).with(filter);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to set default subscriber: {}", e))?;
    tracing_log::LogTracer::init().map_err(|e| format!("Failed to initialize LogTracer: {}", e))?;

    Ok(())
}

/// File output carries thread and source locations; the console stays short.
fn format_layer<W>(sink: Sink, writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let detailed = sink == Sink::File;
    fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(detailed)
        .with_file(detailed)
        .with_line_number(detailed)
        .with_ansi(sink == Sink::Console)
        .with_timer(LocalTimeTimer)
        .boxed()
}

/// Remove log files last modified more than `retention_days` ago.
fn clean_old_logs(log_dir: &Path, retention_days: u64) -> io::Result<()> {
    if !log_dir.exists() {
        return Ok(());
    }

    let cutoff = Local::now() - chrono::Duration::days(retention_days as i64);

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(LOG_FILE_NAME));
        if !is_log {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => chrono::DateTime::<Local>::from(modified),
            Err(_) => continue,
        };
        if modified < cutoff {
            if let Err(e) = fs::remove_file(&path) {
                eprintln!("Failed to remove old log file {:?}: {}", path, e);
            }
        }
    }

    Ok(())
}

/// Timestamps in local time.
#[derive(Debug, Clone, Copy)]
struct LocalTimeTimer;

impl fmt::time::FormatTime for LocalTimeTimer {
    fn format_time(&self, w: &mut fmt::format::Writer) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.6f"))
    }
}
