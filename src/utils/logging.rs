//! Tracing subscriber setup
//!
//! `RUST_LOG` wins; otherwise the crate logs at the configured level. With
//! the `local-logging` feature output goes to `log/backend.log`.

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub fn local_logging_enabled() -> bool {
    cfg!(feature = "local-logging")
}

pub fn resolve_log_dir() -> Result<PathBuf, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Failed to resolve current directory: {e}"))?;
    Ok(cwd.join("log"))
}

/// Filter used when `RUST_LOG` is unset. Browser protocol chatter stays at
/// warn regardless of `level`.
pub fn default_filter(level: &str) -> String {
    format!("animecix_downloader={level},chromiumoxide=warn")
}

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into());

    #[cfg(feature = "local-logging")]
    {
        use std::sync::OnceLock;
        use tracing_appender::non_blocking::WorkerGuard;

        static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

        let log_dir = match resolve_log_dir().and_then(|dir| {
            std::fs::create_dir_all(&dir)
                .map(|_| dir)
                .map_err(|err| format!("Failed to create log directory: {err}"))
        }) {
            Ok(dir) => dir,
            Err(err) => {
                eprintln!("{err}");
                init_stderr(filter);
                return;
            }
        };

        let file_appender = tracing_appender::rolling::never(&log_dir, "backend.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .with_ansi(false)
            .try_init();
    }

    #[cfg(not(feature = "local-logging"))]
    init_stderr(filter);
}

fn init_stderr(filter: EnvFilter) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        let filter = default_filter("debug");
        assert_eq!(filter, "animecix_downloader=debug,chromiumoxide=warn");
        assert!(EnvFilter::try_new(filter).is_ok());
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing_with_level("debug");
    }
}
