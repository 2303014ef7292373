//! # parley-logging
//!
//! Structured logging with `tracing`.
//!
//! [`init_subscriber`] installs a global `tracing-subscriber` registry with an
//! `EnvFilter` (`RUST_LOG` wins over the configured level) and either a
//! human-readable or a JSON formatting layer. Output goes to stderr so
//! stdout stays free for command output.

#![deny(unsafe_code)]

pub mod types;

pub use types::LogLevel;

use parley_settings::{LogFormat, LoggingSettings};
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Crates whose chatter is capped at `warn` unless tracing everything.
const NOISY_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite"];

/// Errors from subscriber setup.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber was already installed.
    #[error("tracing subscriber already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Filter directives for a configured level.
pub fn filter_directives(level: LogLevel) -> String {
    let mut directives = level.as_filter_str().to_string();
    if level > LogLevel::Trace {
        for target in NOISY_TARGETS {
            directives.push_str(&format!(",{target}=warn"));
        }
    }
    directives
}

/// Build the filter: `RUST_LOG` if set and valid, else the configured level.
pub fn build_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(level)))
}

/// Install the global subscriber. Call once at startup.
pub fn init_subscriber(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let level = LogLevel::from_str_lossy(&settings.level);
    let filter = build_filter(level);

    let result = match settings.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init(),
    };

    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
    tracing::debug!(%level, format = ?settings.format, "logging initialized");
    Ok(())
}
