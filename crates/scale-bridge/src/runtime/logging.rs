use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE_PREFIX: &str = "scale-bridge.log";

/// Initialize the tracing subscriber with optional JSON output.
///
/// With a log directory, records are also written as JSON to a daily rotated
/// file. The returned guard flushes that file and must live until exit.
pub fn init_tracing(json_output: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,scale_bridge=debug,scale_io=debug,scale_core=debug")
    });

    let (file_writer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .with(
                file_writer
                    .map(|writer| fmt::layer().json().with_ansi(false).with_writer(writer)),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .with(
                file_writer
                    .map(|writer| fmt::layer().json().with_ansi(false).with_writer(writer)),
            )
            .init();
    }

    guard
}
