use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The engine is embedded in a host process; its own file prefix keeps its
/// daily logs apart from the host's (`amas.log.YYYY-MM-DD`).
const LOG_FILE_PREFIX: &str = "amas.log";

/// Used when the configured level does not parse.
const FALLBACK_FILTER: &str = "danci_amas=info";

/// Keeps the non-blocking file writer alive; drop it last.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

pub fn file_logging_enabled() -> bool {
    std::env::var("ENABLE_FILE_LOGS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

pub fn prepare_log_dir(dir: impl AsRef<Path>) -> std::io::Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    Ok(dir.to_path_buf())
}

/// Daily rolling writer for the engine's own log files.
pub fn engine_file_appender(dir: impl AsRef<Path>) -> RollingFileAppender {
    RollingFileAppender::new(Rotation::DAILY, dir.as_ref(), LOG_FILE_PREFIX)
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER));
    let stdout_layer = fmt::layer().with_target(true);

    if file_logging_enabled() {
        let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
        match prepare_log_dir(&log_dir) {
            Ok(dir) => {
                let (file_writer, guard) = tracing_appender::non_blocking(engine_file_appender(dir));
                let file_layer = fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_target(true);

                let installed = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(stdout_layer)
                    .with(file_layer)
                    .try_init()
                    .is_ok();

                return installed.then_some(FileLogGuard { _guard: guard });
            }
            Err(err) => {
                eprintln!("failed to create log directory {log_dir}: {err}");
            }
        }
    }

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init();

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_log_dir_creates_nested_directories() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        let created = prepare_log_dir(&nested).unwrap();
        assert!(created.is_dir());
        assert_eq!(created, nested);
    }

    #[test]
    fn engine_logs_use_their_own_prefix() {
        use std::io::Write;

        let root = tempfile::tempdir().unwrap();
        let mut appender = engine_file_appender(root.path());
        writeln!(appender, "decision").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(!names.is_empty());
        assert!(names.iter().all(|n| n.starts_with("amas.log")));
    }

    #[test]
    fn init_tracing_twice_does_not_panic() {
        let _first = init_tracing("debug");
        let _second = init_tracing("not a filter ===");
    }
}
