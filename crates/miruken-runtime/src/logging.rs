//! Tracing subscriber setup.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and one
//! formatting layer. Span events make the `dispatch` spans opened around
//! every top-level dispatch visible.
//!
//! # From configuration
//!
//! ```rust,ignore
//! use miruken_runtime::{config::load_config, logging};
//!
//! let config = load_config()?;
//! logging::init_from_config(&config.logging);
//! ```
//!
//! # Manual
//!
//! ```rust,ignore
//! use miruken_runtime::logging::{LoggingBuilder, SpanEvents};
//!
//! LoggingBuilder::new()
//!     .directive("miruken_core=debug")
//!     .span_events(SpanEvents::LIFECYCLE)
//!     .init();
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogOutput, LogRotation, LoggingConfig, SpanEventConfig};
use crate::error::{RuntimeError, RuntimeResult};

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    /// Creation and close; one line when a dispatch starts and one when it
    /// finishes.
    pub const LIFECYCLE: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };

    pub const FULL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };

    fn to_fmt_span(self) -> fmt::format::FmtSpan {
        let mut span = fmt::format::FmtSpan::NONE;
        if self.new {
            span |= fmt::format::FmtSpan::NEW;
        }
        if self.enter {
            span |= fmt::format::FmtSpan::ENTER;
        }
        if self.exit {
            span |= fmt::format::FmtSpan::EXIT;
        }
        if self.close {
            span |= fmt::format::FmtSpan::CLOSE;
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
/// A subscriber that is already installed is left in place.
pub fn init_from_config(config: &LoggingConfig) {
    if let Err(err) = LoggingBuilder::from_config(config).try_init() {
        warn!(error = %err, "logging was not initialized from configuration");
    }
}

/// Builder for the global tracing subscriber.
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: tracing::Level,
    directives: Vec<String>,
    span_events: SpanEvents,
    format: LogFormat,
    output: LogOutput,
    target: bool,
    thread_ids: bool,
    file_location: bool,
    file_path: Option<PathBuf>,
    rotation: LogRotation,
    max_files: usize,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self {
            level: tracing::Level::INFO,
            directives: Vec::new(),
            span_events: SpanEvents::NONE,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            target: true,
            thread_ids: false,
            file_location: false,
            file_path: None,
            rotation: LogRotation::Never,
            max_files: 5,
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        let directives = config
            .filters
            .iter()
            .map(|(module, level)| format!("{module}={level}"))
            .collect();
        Self {
            level: config.level.to_tracing_level(),
            directives,
            span_events: SpanEvents::from(&config.span_events),
            format: config.format,
            output: config.output,
            target: true,
            thread_ids: config.thread_ids,
            file_location: config.file_location,
            file_path: config.file_path.clone(),
            rotation: config.rotation,
            max_files: config.max_files as usize,
        }
    }

    pub fn level(mut self, level: tracing::Level) -> Self {
        self.level = level;
        self
    }

    /// Adds a filter directive such as `miruken_core::handler=trace`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn target(mut self, enabled: bool) -> Self {
        self.target = enabled;
        self
    }

    pub fn thread_ids(mut self, enabled: bool) -> Self {
        self.thread_ids = enabled;
        self
    }

    /// Include the source file and line of each event.
    pub fn file_location(mut self, enabled: bool) -> Self {
        self.file_location = enabled;
        self
    }

    /// Writes to `path`, rolling over as configured.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = LogOutput::File;
        self.file_path = Some(path.into());
        self
    }

    pub fn rotation(mut self, rotation: LogRotation, max_files: usize) -> Self {
        self.rotation = rotation;
        self.max_files = max_files;
        self
    }

    /// `RUST_LOG` when set, otherwise the configured level, plus every
    /// directive that parses.
    fn build_filter(&self) -> EnvFilter {
        let base = self.level.to_string().to_lowercase();
        let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));
        for directive in &self.directives {
            match directive.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(err) => eprintln!("ignoring log directive '{directive}': {err}"),
            }
        }
        filter
    }

    fn build_writer(&self) -> RuntimeResult<BoxMakeWriter> {
        match self.output {
            LogOutput::Stdout => Ok(BoxMakeWriter::new(std::io::stdout)),
            LogOutput::Stderr => Ok(BoxMakeWriter::new(std::io::stderr)),
            LogOutput::File => {
                let Some(path) = &self.file_path else {
                    eprintln!("file output requested without a file path, using stdout");
                    return Ok(BoxMakeWriter::new(std::io::stdout));
                };
                let directory = path.parent().unwrap_or_else(|| Path::new("."));
                let prefix = path
                    .file_name()
                    .unwrap_or_else(|| OsStr::new("miruken.log"))
                    .to_string_lossy()
                    .into_owned();
                let rotation = match self.rotation {
                    LogRotation::Never => Rotation::NEVER,
                    LogRotation::Hourly => Rotation::HOURLY,
                    LogRotation::Daily => Rotation::DAILY,
                };
                let appender = RollingFileAppender::builder()
                    .rotation(rotation)
                    .filename_prefix(prefix)
                    .max_log_files(self.max_files.max(1))
                    .build(directory)
                    .map_err(|err| RuntimeError::Logging(err.to_string()))?;
                Ok(BoxMakeWriter::new(appender))
            }
        }
    }

    fn build_layer(&self, writer: BoxMakeWriter) -> Box<dyn Layer<Registry> + Send + Sync> {
        let span_events = self.span_events.to_fmt_span();
        let (target, thread_ids, location) = (self.target, self.thread_ids, self.file_location);

        macro_rules! styled {
            ($layer:expr) => {
                $layer
                    .with_span_events(span_events)
                    .with_target(target)
                    .with_thread_ids(thread_ids)
                    .with_file(location)
                    .with_line_number(location)
                    .with_writer(writer)
                    .boxed()
            };
        }

        match self.format {
            LogFormat::Compact => styled!(fmt::layer().compact()),
            LogFormat::Pretty => styled!(fmt::layer().pretty()),
            LogFormat::Full => styled!(fmt::layer()),
            #[cfg(feature = "json-log")]
            LogFormat::Json => fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_writer(writer)
                .boxed(),
            #[cfg(not(feature = "json-log"))]
            LogFormat::Json => {
                eprintln!("json logging requires the `json-log` feature, using the full format");
                styled!(fmt::layer())
            }
        }
    }

    /// Installs the subscriber, ignoring an already installed one.
    pub fn init(self) {
        let _ = self.try_init();
    }

    pub fn try_init(self) -> RuntimeResult<()> {
        let filter = self.build_filter();
        let layer = self.build_layer(self.build_writer()?);
        tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init()
            .map_err(|err| RuntimeError::Logging(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_from_config() {
        let mut config = LoggingConfig {
            level: LogLevel::Debug,
            thread_ids: true,
            span_events: SpanEventConfig {
                new: true,
                close: true,
                ..Default::default()
            },
            ..Default::default()
        };
        config.filters.insert("miruken_core".into(), LogLevel::Trace);

        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, tracing::Level::DEBUG);
        assert_eq!(builder.span_events, SpanEvents::LIFECYCLE);
        assert_eq!(builder.directives, vec!["miruken_core=trace".to_string()]);
        assert!(builder.thread_ids);
    }

    #[test]
    fn test_span_events_to_fmt_span() {
        assert_eq!(SpanEvents::NONE.to_fmt_span(), fmt::format::FmtSpan::NONE);
        assert_eq!(
            SpanEvents::LIFECYCLE.to_fmt_span(),
            fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
        );
        assert_eq!(SpanEvents::FULL.to_fmt_span(), fmt::format::FmtSpan::FULL);
    }

    #[test]
    fn test_file_builder() {
        let builder = LoggingBuilder::new().file("logs/app.log").rotation(LogRotation::Daily, 3);
        assert_eq!(builder.output, LogOutput::File);
        assert_eq!(builder.file_path.as_deref(), Some(Path::new("logs/app.log")));
        assert_eq!(builder.max_files, 3);
    }
}
