//! Structured logging setup. Trimmed relative to the teacher's custom
//! nonblocking JSON writer: this sets up `tracing-subscriber` with an
//! `EnvFilter` and, optionally, a rolling file appender, which is enough for
//! this process's scale and keeps the dependency surface small.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

/// Must be kept alive for the lifetime of the process; dropping it flushes
/// and stops the background log-writing thread.
#[must_use = "dropping the guard stops log flushing"]
pub struct LoggingGuard(#[allow(dead_code)] Option<WorkerGuard>);

/// Initializes the global `tracing` subscriber.
///
/// Log level is controlled by `RUST_LOG` (defaulting to `info`). When
/// `log_dir` is given, logs are additionally written as newline-delimited
/// JSON to a daily-rolling file in that directory; stderr always gets
/// human-readable output.
pub fn setup_logging(log_dir: Option<&Path>) -> LoggingGuard {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	let stderr_layer = tracing_subscriber::fmt::layer()
		.with_writer(std::io::stderr)
		.with_span_events(FmtSpan::CLOSE);

	match log_dir {
		Some(dir) => {
			let appender = tracing_appender::rolling::daily(dir, "kedge.log");
			let (nonblocking, guard) = tracing_appender::non_blocking(appender);
			let file_layer = tracing_subscriber::fmt::layer()
				.json()
				.with_writer(nonblocking);
			tracing_subscriber::registry()
				.with(filter)
				.with(stderr_layer)
				.with(file_layer)
				.init();
			LoggingGuard(Some(guard))
		},
		None => {
			tracing_subscriber::registry()
				.with(filter)
				.with(stderr_layer)
				.init();
			LoggingGuard(None)
		},
	}
}
