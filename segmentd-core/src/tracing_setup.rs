//! Tracing setup for segmentd
//!
//! The console shows segmentd's own events at the level picked on the command
//! line, with dependencies held to warnings. Every run also leaves a full
//! trace of the coordinator in `segmentd-last-run.log`, which is where window
//! scheduling and per-segment timings end up when a request misbehaves.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::SegmentdError;

/// File the previous run's trace is written to, inside the logs directory
pub const LOG_FILE_NAME: &str = "segmentd-last-run.log";

const DEFAULT_LOGS_DIR: &str = "logs";
const SEGMENTD_TARGETS: [&str; 2] = ["segmentd_core", "segmentd"];

/// Installs the console and trace file subscribers and returns the trace path.
///
/// `RUST_LOG` replaces the console directives but never the file's. The
/// trace file is truncated on every run.
///
/// # Errors
/// - `SegmentdError::Io` - The logs directory or trace file cannot be created
/// - `SegmentdError::Configuration` - A global subscriber is already installed
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<PathBuf, SegmentdError> {
    let (trace_path, trace_file) =
        open_trace_file(logs_dir.unwrap_or_else(|| Path::new(DEFAULT_LOGS_DIR)))?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directives(console_level)));

    let console_layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_filter(console_filter);

    let trace_layer = fmt::layer()
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(trace_file)
        .with_filter(EnvFilter::new(console_directives(Level::TRACE)));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(trace_layer)
        .try_init()
        .map_err(|e| SegmentdError::Configuration {
            reason: format!("tracing already initialized: {e}"),
        })?;

    tracing::debug!(
        "Console logging at {}, full trace in {}",
        console_level,
        trace_path.display()
    );

    Ok(trace_path)
}

/// Filter directives: segmentd crates at `level`, everything else at warn.
fn console_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(
        SEGMENTD_TARGETS
            .iter()
            .map(|target| format!("{target}={level}")),
    );
    directives.join(",")
}

fn open_trace_file(logs_dir: &Path) -> std::io::Result<(PathBuf, File)> {
    create_dir_all(logs_dir)?;
    let path = logs_dir.join(LOG_FILE_NAME);
    let file = File::create(&path)?;
    Ok((path, file))
}

/// Console verbosity accepted by `--log-level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Failed productions and internal errors
    Error,
    /// Also abandoned windows and priming timeouts
    Warn,
    /// Window progress and readiness changes
    #[default]
    Info,
    /// Cache hits, misses and per-segment timings
    Debug,
    /// Everything, including wait queue bookkeeping
    Trace,
}

impl CliLogLevel {
    /// Converts CLI log level to tracing Level enum.
    ///
    /// # Examples
    /// ```
    /// use segmentd_core::tracing_setup::CliLogLevel;
    ///
    /// let level = CliLogLevel::Debug.as_tracing_level();
    /// assert_eq!(level, tracing::Level::DEBUG);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_level_mapping() {
        assert_eq!(CliLogLevel::Error.as_tracing_level(), Level::ERROR);
        assert_eq!(CliLogLevel::default().as_tracing_level(), Level::INFO);
        assert_eq!(CliLogLevel::Trace.as_tracing_level(), Level::TRACE);
    }

    #[test]
    fn test_console_directives_scope_segmentd_crates() {
        assert_eq!(
            console_directives(Level::DEBUG),
            "warn,segmentd_core=debug,segmentd=debug"
        );
        assert!(EnvFilter::try_new(console_directives(Level::TRACE)).is_ok());
    }

    #[test]
    fn test_trace_file_truncated_between_runs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let logs_dir = temp_dir.path().join("nested").join("logs");

        let (path, _file) = open_trace_file(&logs_dir).unwrap();
        assert_eq!(path, logs_dir.join(LOG_FILE_NAME));
        std::fs::write(&path, b"previous run").unwrap();

        let (path, _file) = open_trace_file(&logs_dir).unwrap();
        assert_eq!(std::fs::metadata(path).unwrap().len(), 0);
    }
}
