//! Logging types shared across the crate.

/// Log level accepted in settings and on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Frame-level detail.
    Trace,
    /// State transitions and decisions.
    Debug,
    /// Connection lifecycle (default).
    Info,
    /// Dropped operations, reconnects.
    Warn,
    /// Errors.
    Error,
}

impl LogLevel {
    /// Convert from string (case-insensitive). Unknown values map to `Info`.
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "warn" | "warning" => Self::Warn,
            "error" | "fatal" => Self::Error,
            _ => Self::Info,
        }
    }

    /// Directive understood by `EnvFilter`.
    #[must_use]
    pub const fn as_filter_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_filter_str())
    }
}
