//! Logging and tracing configuration
//!
//! Stdout belongs to the reporters, so every layer here writes to stderr or
//! to a file.

use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// Initialize tracing for one-shot runs (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tester=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for watch mode (file + stderr logging)
///
/// Watch sessions are long-lived, so full details also go to a daily log
/// file under the platform data directory. The returned guard must be held
/// for the lifetime of the session to flush the file writer.
pub fn init_watch() -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tester=debug,info"));

    let log_dir = paths::log_dir().filter(|dir| std::fs::create_dir_all(dir).is_ok());
    let (subscriber, guard) = watch_subscriber(filter, log_dir.as_deref());
    subscriber.init();

    if let Some(log_dir) = log_dir {
        tracing::debug!(log_dir = %log_dir.display(), "File logging enabled");
    }
    guard
}

/// Stderr layer, plus a rolling file layer when `log_dir` is given
fn watch_subscriber(
    filter: EnvFilter,
    log_dir: Option<&Path>,
) -> (impl Subscriber + Send + Sync + 'static, Option<WorkerGuard>) {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "watch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        // Fallback: stderr only
        None => (None, None),
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .compact();

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer);
    (subscriber, guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_subscriber_writes_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let (subscriber, guard) = watch_subscriber(EnvFilter::new("info"), Some(dir.path()));
        assert!(guard.is_some());

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(file = "a.lua", "Re-running");
        });
        drop(guard);

        let logged: String = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect();
        assert!(logged.contains("Re-running"), "{}", logged);
    }

    #[test]
    fn test_watch_subscriber_without_log_dir() {
        let (subscriber, guard) = watch_subscriber(EnvFilter::new("info"), None);
        assert!(guard.is_none());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("stderr only");
        });
    }
}
