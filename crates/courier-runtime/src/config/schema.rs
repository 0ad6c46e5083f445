//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use courier_framework::AppConfig;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CourierConfig {
    /// Settings handed to the application.
    #[serde(default)]
    pub app: AppConfig,

    /// Server loop settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// Server
// =============================================================================

/// Server loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// The JID the application signs in as.
    #[serde(default)]
    pub jid: Option<String>,

    /// Password for the account.
    #[serde(default)]
    pub password: Option<String>,

    /// Drop stanzas whose sender is the application itself.
    #[serde(default = "default_true")]
    pub skip_own_stanzas: bool,

    /// Drop message stanzas without a body.
    #[serde(default = "default_true")]
    pub skip_empty_messages: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            jid: None,
            password: None,
            skip_own_stanzas: true,
            skip_empty_messages: true,
        }
    }
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// The matching `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }

    /// Lowercase name, as used in filter directives.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level.
    pub level: LogLevel,
    /// Line format.
    pub format: LogFormat,
    /// Destination.
    pub output: LogOutput,
    /// Span lifecycle events.
    pub span_events: SpanEventConfig,
    /// Include thread ids.
    pub thread_ids: bool,
    /// Include file and line.
    pub file_location: bool,
    /// Log file, for `output = "file"`.
    pub file_path: Option<PathBuf>,
    /// Size threshold of a log file, in bytes.
    pub max_file_size: u64,
    /// Number of log files kept.
    pub max_files: u32,
    /// Per-target levels, e.g. `courier_core = "debug"`.
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            max_file_size: 10 * 1024 * 1024,
            max_files: 5,
            filters: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CourierConfig::default();
        assert!(config.server.skip_own_stanzas);
        assert!(config.server.skip_empty_messages);
        assert_eq!(config.server.jid, None);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.app.session_ttl_secs, 3600);
    }

    #[test]
    fn test_partial_server_section() {
        let server: ServerConfig =
            serde_json::from_str(r#"{"jid": "bot@example.com", "skip_own_stanzas": false}"#)
                .unwrap();
        assert_eq!(server.jid.as_deref(), Some("bot@example.com"));
        assert!(!server.skip_own_stanzas);
        assert!(server.skip_empty_messages);
    }

    #[test]
    fn test_log_level_names() {
        let level: LogLevel = serde_json::from_str(r#""warn""#).unwrap();
        assert_eq!(level, LogLevel::Warn);
        assert_eq!(level.to_string(), "warn");
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
