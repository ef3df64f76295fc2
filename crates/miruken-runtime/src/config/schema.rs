//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MirukenConfig {
    /// Tracing subscriber and logging filter settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Setup and bootstrap settings.
    #[serde(default)]
    pub setup: SetupConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
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
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `Full` otherwise.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Span lifecycle events to record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Global level, overridden by `RUST_LOG`.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids in each line.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line in each line.
    #[serde(default)]
    pub file_location: bool,

    /// Log file used when `output` is `file`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Rotated files kept on disk.
    #[serde(default = "default_max_files")]
    pub max_files: u32,

    /// Per-module levels, e.g. `miruken_core = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,

    /// Default verbosity of the handler logging filter.
    #[serde(default)]
    pub verbosity: u8,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            rotation: LogRotation::default(),
            max_files: default_max_files(),
            filters: BTreeMap::new(),
            verbosity: 0,
        }
    }
}

fn default_max_files() -> u32 {
    5
}

// =============================================================================
// Setup
// =============================================================================

/// Setup configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetupConfig {
    /// Register handler specs behind the inference handler.
    #[serde(default = "default_inference")]
    pub inference: bool,

    /// Bound on bootstrap startup in milliseconds; 0 waits indefinitely.
    #[serde(default)]
    pub startup_timeout_ms: u64,

    /// Bound on bootstrap shutdown in milliseconds; 0 waits indefinitely.
    #[serde(default)]
    pub shutdown_timeout_ms: u64,
}

impl SetupConfig {
    pub fn startup_timeout(&self) -> Option<Duration> {
        (self.startup_timeout_ms > 0).then(|| Duration::from_millis(self.startup_timeout_ms))
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        (self.shutdown_timeout_ms > 0).then(|| Duration::from_millis(self.shutdown_timeout_ms))
    }
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            inference: default_inference(),
            startup_timeout_ms: 0,
            shutdown_timeout_ms: 0,
        }
    }
}

fn default_inference() -> bool {
    true
}
