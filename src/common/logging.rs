//! Logging and tracing configuration
//!
//! The collector logs to stderr (and optionally a file). Workers stay silent
//! unless `RUST_LOG` is set, because their stderr may be captured and shown as
//! part of a test's output.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the collector
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate (DEBUG when verbose), WARN for
/// dependencies. When `log_file` is given, a second non-blocking layer writes
/// full details there; keep the returned guard alive until exit.
pub fn init_collector(verbose: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let default = if verbose { "crucible=debug,warn" } else { "crucible=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let file_writer = log_file.and_then(|path| {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path.file_name()?;
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Warning: Could not create log directory: {}", e);
            return None;
        }
        Some(tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name)))
    });

    match file_writer {
        Some((writer, guard)) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

/// Initialize tracing inside a worker process
///
/// Only installs a subscriber when `RUST_LOG` is present.
pub fn init_worker() {
    let Ok(filter) = EnvFilter::try_from_default_env() else {
        return;
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(true)
                .compact(),
        )
        .try_init();
}
