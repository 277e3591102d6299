//! Tracing setup for the `lingo-srs` binary.
//!
//! Command results are printed as JSON on stdout, so no layer here may write
//! there: human-readable logs go to stderr and, when a log directory is
//! configured, to a daily rolling file.

use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// File name prefix of the rolling log; the appender adds the date.
pub const LOG_FILE_PREFIX: &str = "lingo-srs.log";

/// Keeps the background file writer alive; drop it last.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Filter from a `RUST_LOG`-style directive, `info` when it does not parse.
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Safe to call more than once; later calls leave the first subscriber in
/// place. A log directory that cannot be created downgrades to stderr only.
pub fn init_tracing(log_level: &str, log_dir: Option<&Path>) -> Option<FileLogGuard> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let (file_layer, guard) = match log_dir.and_then(open_log_file) {
        Some((writer, guard)) => {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(FileLogGuard { _guard: guard }))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}

fn open_log_file(log_dir: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    if let Err(err) = std::fs::create_dir_all(log_dir) {
        eprintln!("failed to create log directory {}: {err}", log_dir.display());
        return None;
    }
    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    Some(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_directive_falls_back_to_info() {
        use tracing_subscriber::filter::LevelFilter;
        assert_eq!(env_filter("lingo_srs=loud").max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(env_filter("debug").max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_open_log_file_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs").join("srs");
        assert!(open_log_file(&nested).is_some());
        assert!(nested.is_dir());
    }
}
