//! Logging setup for Courier processes.
//!
//! Everything in the workspace logs through `tracing`. This module installs
//! the global subscriber: an [`EnvFilter`] (honouring `RUST_LOG`) in front of
//! a single fmt layer writing to stdout, stderr or a file.
//!
//! ```rust,ignore
//! use courier_runtime::{config::load_config, logging};
//!
//! let config = load_config()?;
//! logging::init_from_config(&config.logging);
//! ```
//!
//! Each dispatch cycle runs in a `dispatch` span; enable
//! [`SpanEvents::LIFECYCLE`] to see one line per stanza:
//!
//! ```rust,ignore
//! LoggingBuilder::new()
//!     .directive("courier_framework=debug")
//!     .span_events(SpanEvents::LIFECYCLE)
//!     .init();
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LogOutput, LoggingConfig, SpanEventConfig};

const DEFAULT_LOG_FILE: &str = "courier.log";

/// Which span lifecycle events produce log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    /// No span events.
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    /// Creation and close: one pair of lines per dispatch cycle.
    pub const LIFECYCLE: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };

    /// Every span event.
    pub const FULL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };

    fn to_fmt_span(self) -> FmtSpan {
        let mut span = FmtSpan::NONE;
        if self.new {
            span |= FmtSpan::NEW;
        }
        if self.enter {
            span |= FmtSpan::ENTER;
        }
        if self.exit {
            span |= FmtSpan::EXIT;
        }
        if self.close {
            span |= FmtSpan::CLOSE;
        }
        span
    }
}

impl From<&SpanEventConfig> for SpanEvents {
    fn from(config: &SpanEventConfig) -> Self {
        Self {
            new: config.new,
            enter: config.enter,
            exit: config.exit,
            close: config.close,
        }
    }
}

/// Installs the global subscriber described by `config`.
///
/// Does nothing when a subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

// =============================================================================
// LoggingBuilder
// =============================================================================

/// Builder for the global subscriber.
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    directives: Vec<String>,
    level: tracing::Level,
    span_events: SpanEvents,
    format: LogFormat,
    output: LogOutput,
    with_target: bool,
    with_thread_ids: bool,
    with_file: bool,
    file_path: Option<PathBuf>,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    /// Info level, compact lines on stdout.
    pub fn new() -> Self {
        Self {
            directives: Vec::new(),
            level: tracing::Level::INFO,
            span_events: SpanEvents::NONE,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            file_path: None,
        }
    }

    /// Builder preloaded from a [`LoggingConfig`].
    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut builder = Self::new()
            .with_level(config.level.to_tracing_level())
            .format(config.format)
            .output(config.output)
            .span_events(SpanEvents::from(&config.span_events))
            .with_thread_ids(config.thread_ids)
            .with_file(config.file_location);
        builder.file_path.clone_from(&config.file_path);

        let mut filters: Vec<_> = config.filters.iter().collect();
        filters.sort_by(|a, b| a.0.cmp(b.0));
        for (target, level) in filters {
            builder = builder.directive(format!("{target}={level}"));
        }
        builder
    }

    /// Sets the base level.
    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = level;
        self
    }

    /// Adds a filter directive such as `courier_core=trace`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Sets which span events are logged.
    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    /// Sets the line format.
    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the destination.
    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Includes the event target.
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Includes thread ids.
    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    /// Includes file names and line numbers.
    pub fn with_file(mut self, enabled: bool) -> Self {
        self.with_file = enabled;
        self
    }

    /// Sets the log file used with [`LogOutput::File`].
    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// The filter: `RUST_LOG` if set, otherwise the base level, plus every
    /// parseable directive. Malformed directives are skipped.
    pub fn build_filter(&self) -> EnvFilter {
        let base = self.level.to_string().to_lowercase();
        let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));
        for directive in &self.directives {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
        filter
    }

    /// Installs the subscriber, ignoring a second installation.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let filter = self.build_filter();
        let span_events = self.span_events.to_fmt_span();

        macro_rules! configure {
            ($layer:expr) => {
                $layer
                    .with_span_events(span_events.clone())
                    .with_target(self.with_target)
                    .with_thread_ids(self.with_thread_ids)
                    .with_file(self.with_file)
                    .with_line_number(self.with_file)
            };
        }

        macro_rules! install {
            ($writer:expr) => {
                match self.format {
                    #[cfg(feature = "json-log")]
                    LogFormat::Json => tracing_subscriber::registry()
                        .with(
                            fmt::layer()
                                .json()
                                .with_span_events(span_events.clone())
                                .with_writer($writer),
                        )
                        .with(filter)
                        .try_init(),
                    LogFormat::Compact => tracing_subscriber::registry()
                        .with(configure!(fmt::layer().compact().with_writer($writer)))
                        .with(filter)
                        .try_init(),
                    LogFormat::Full => tracing_subscriber::registry()
                        .with(configure!(fmt::layer().with_writer($writer)))
                        .with(filter)
                        .try_init(),
                    LogFormat::Pretty => tracing_subscriber::registry()
                        .with(configure!(fmt::layer().pretty().with_writer($writer)))
                        .with(filter)
                        .try_init(),
                }
            };
        }

        match (self.output, self.file_path.as_deref()) {
            (LogOutput::Stdout, _) => install!(std::io::stdout),
            (LogOutput::Stderr, _) => install!(std::io::stderr),
            (LogOutput::File, Some(path)) => {
                let appender = tracing_appender::rolling::never(
                    path.parent().unwrap_or_else(|| Path::new(".")),
                    path.file_name()
                        .unwrap_or_else(|| OsStr::new(DEFAULT_LOG_FILE)),
                );
                install!(appender)
            }
            (LogOutput::File, None) => {
                warn!("file output requested without a file path, logging to stdout");
                install!(std::io::stdout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_span_events_flags() {
        assert_eq!(SpanEvents::NONE.to_fmt_span(), FmtSpan::NONE);
        assert_eq!(
            SpanEvents::LIFECYCLE.to_fmt_span(),
            FmtSpan::NEW | FmtSpan::CLOSE
        );
        let from_config = SpanEvents::from(&SpanEventConfig {
            enter: true,
            ..Default::default()
        });
        assert_eq!(from_config.to_fmt_span(), FmtSpan::ENTER);
    }

    #[test]
    fn test_from_config() {
        let mut config = LoggingConfig {
            level: LogLevel::Debug,
            thread_ids: true,
            ..Default::default()
        };
        config.filters.insert("courier_core".into(), LogLevel::Trace);
        config.filters.insert("courier_framework".into(), LogLevel::Warn);

        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, tracing::Level::DEBUG);
        assert!(builder.with_thread_ids);
        assert_eq!(
            builder.directives,
            vec!["courier_core=trace", "courier_framework=warn"]
        );
    }
}
