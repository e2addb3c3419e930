//! Utilities for logging.
//!
//! Library crates only emit `tracing` events. Binaries and tests pick a
//! subscriber through this crate.
use std::io;
use std::sync::Once;

use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    HumanReadable,
    Json,
    Pretty,
}

/// Build the env filter, letting `RUST_LOG` override the default level.
fn env_filter(default_level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy()
}

/// Configure the global subscriber.
///
/// Does nothing if a global subscriber has already been installed.
pub fn configure_global_logger<W>(default_level: Level, format: LogFormat, writer: W)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let builder = FmtSubscriber::builder()
        .with_env_filter(env_filter(default_level))
        .with_writer(writer)
        .with_file(true)
        .with_line_number(true);

    let result = match format {
        LogFormat::HumanReadable => {
            tracing::subscriber::set_global_default(builder.with_target(false).finish())
        }
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish()),
    };

    // Already set, keep the existing one.
    let _ = result;
}

/// Configure the global subscriber writing to stderr.
pub fn configure_stderr_logger(default_level: Level, format: LogFormat) {
    configure_global_logger(default_level, format, io::stderr)
}

static TEST_INIT: Once = Once::new();

/// Install a subscriber suitable for tests. Safe to call from every test.
pub fn init_test() {
    TEST_INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder()
            .with_test_writer()
            .with_env_filter(env_filter(Level::DEBUG))
            .with_file(true)
            .with_line_number(true)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_test_idempotent() {
        init_test();
        init_test();
        tracing::debug!("logger installed");
    }
}
