use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directory the rolling JSON log is written to
pub const LOG_DIR: &str = "logs";

/// Initializes the logging system with both console and file output.
///
/// `RUST_LOG` wins when set; otherwise the crate logs at info.
pub fn init_logging() {
    let _ = fs::create_dir_all(LOG_DIR);

    // Daily rotation, non-blocking writer
    let file_appender = tracing_appender::rolling::daily(LOG_DIR, "synth.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_writer(std::io::stdout);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("outage_synth=info"));

    let initialized = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .is_ok();

    // Keep the guard alive for the life of the process so logs are flushed
    if initialized {
        std::mem::forget(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_does_not_panic() {
        init_logging();
        init_logging();
        tracing::info!("logging initialized");
        assert!(std::path::Path::new(LOG_DIR).is_dir());
    }
}
