//! tracing setup for the binary and span macros for the library
//!
//! Logs always go to stderr. Stdout is reserved for tool results so a
//! front-end can read it line by line.
//!
//! Settings come from the environment:
//!
//! | Variable     | Values                            | Default   |
//! |--------------|-----------------------------------|-----------|
//! | `LOG_LEVEL`  | error, warn, info, debug, trace   | `info`    |
//! | `LOG_FORMAT` | json, pretty, compact             | `compact` |
//! | `LOG_SPANS`  | true, false                       | `false`   |
//! | `RUST_LOG`   | `EnvFilter` directives            | unset     |
//!
//! `RUST_LOG` replaces the level filter entirely when set.
//!
//! ```bash
//! LOG_FORMAT=json mqtt-tools serve
//! LOG_LEVEL=debug LOG_SPANS=true mqtt-tools call topics
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependencies that are chatty below WARN
const QUIET_CRATES: [&str; 2] = ["rumqttc=warn", "tokio=warn"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Multi-line, coloured
    Pretty,
    /// Single-line, coloured, no targets
    Compact,
}

impl LogFormat {
    /// Case-insensitive; unknown names fall back to `Compact`
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Case-insensitive level name; unknown names fall back to INFO
pub fn parse_level(s: &str) -> Level {
    s.trim().parse().unwrap_or(Level::INFO)
}

/// Resolved logging configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    /// Emit span open/close events
    pub include_spans: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            include_spans: false,
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            level: env::var("LOG_LEVEL").map_or(defaults.level, |v| parse_level(&v)),
            format: env::var("LOG_FORMAT").map_or(defaults.format, |v| LogFormat::parse(&v)),
            include_spans: env::var("LOG_SPANS").is_ok_and(|v| v.eq_ignore_ascii_case("true")),
        }
    }

    /// Same settings at a different level, for `-v` flags
    pub fn with_level(self, level: Level) -> Self {
        Self { level, ..self }
    }

    fn filter(&self) -> EnvFilter {
        if let Ok(rust_log) = env::var("RUST_LOG") {
            return EnvFilter::new(rust_log);
        }
        QUIET_CRATES
            .iter()
            .filter_map(|directive| directive.parse().ok())
            .fold(EnvFilter::new(self.level.to_string()), |filter, directive| {
                filter.add_directive(directive)
            })
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    /// Install the global subscriber; later calls are ignored
    pub fn install(&self) {
        let registry = tracing_subscriber::registry().with(self.filter());
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(self.span_events());

        let installed = match self.format {
            LogFormat::Json => registry.with(layer.json()).try_init(),
            LogFormat::Pretty => registry.with(layer.pretty().with_ansi(true)).try_init(),
            LogFormat::Compact => registry
                .with(layer.compact().with_ansi(true).with_target(false))
                .try_init(),
        };

        if installed.is_err() {
            tracing::debug!("Global subscriber already installed");
        }
    }
}

/// Install logging with explicit settings
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    LogSettings {
        level,
        format,
        include_spans,
    }
    .install();
}

/// Install logging configured from `LOG_*` variables
pub fn init_default_logging() {
    LogSettings::from_env().install();
}

/// Span around one tool invocation
#[macro_export]
macro_rules! tool_span {
    ($($field:tt)*) => {
        tracing::info_span!("tool_execution", $($field)*)
    };
}

/// Span around one broker-facing operation
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_operation", $($field)*)
    };
}

/// Span around cache load and persist
#[macro_export]
macro_rules! cache_span {
    ($($field:tt)*) => {
        tracing::debug_span!("cache_operation", $($field)*)
    };
}

pub use {cache_span, mqtt_span, tool_span};
