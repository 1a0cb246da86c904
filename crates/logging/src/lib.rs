//! Claimcraft Logging
//!
//! Tracing setup shared by the claimcraft binaries.
//!
//! ## Usage
//!
//! ```no_run
//! use claimcraft_logging::{init, LogLevel};
//!
//! // From a `-v` count (common CLI pattern)
//! init(LogLevel::from_verbosity(1));
//!
//! // Or from a config value
//! let level: LogLevel = "warn".parse().unwrap_or_default();
//! init(level);
//! ```
//!
//! `RUST_LOG` overrides the requested level. Without it, chatty dependencies
//! (RPC transport, HTTP) are held at `warn` so operator output stays readable.

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// Dependencies that log every request at debug level.
const QUIET_TARGETS: [&str; 4] = ["solana_rpc_client", "solana_client", "reqwest", "hyper"];

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// `0` → `Info`, `1` → `Debug`, `2+` → `Trace`
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => Self::Info,
            1 => Self::Debug,
            _ => Self::Trace,
        }
    }

    /// `false` → `Info`, `true` → `Debug`
    pub fn from_verbose(verbose: bool) -> Self {
        Self::from_verbosity(verbose as u8)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Filter directives for this level with noisy dependencies capped at `warn`.
    pub fn directives(&self) -> String {
        let mut directives = vec![self.as_str().to_string()];
        if *self > Self::Warn {
            directives.extend(QUIET_TARGETS.iter().map(|t| format!("{}=warn", t)));
        }
        directives.join(",")
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directives()))
}

/// Initialize logging. Call once at startup.
///
/// # Panics
///
/// Panics if a global subscriber is already set. Use `try_init` to handle that.
pub fn init(level: LogLevel) {
    init_with_target(level, false);
}

/// Try to initialize logging, returning an error if already initialized
pub fn try_init(level: LogLevel) -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_target(false)
        .try_init()
        .map_err(|e| e.to_string())
}

/// Initialize logging, optionally printing the module target of each event.
pub fn init_with_target(level: LogLevel, show_target: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_target(show_target)
        .init();
}

/// Initialize logging for tests (captures output for test framework)
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
