//! Utilities for logging.
use std::io;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-field, human readable lines.
    #[default]
    HumanReadable,
    /// One JSON object per line.
    Json,
}

/// Configure the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. Calling this more than
/// once is a no-op since only the first subscriber can be installed.
pub fn configure_global_logger<W>(level: Level, format: LogFormat, writer: W)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_ascii_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_thread_ids(true);

    let _ = match format {
        LogFormat::HumanReadable => builder.with_target(true).try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
}

/// Install a debug level logger that writes through the test harness capture.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Logger writing to stderr, used by binaries.
pub fn init_stderr(level: Level, format: LogFormat) {
    configure_global_logger(level, format, io::stderr);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_fine() {
        init_test();
        init_test();
        tracing::debug!("logger initialized");
    }
}
