//! Logging setup and span macros

pub mod logging;

pub use logging::{
    cache_span, init_default_logging, init_logging, mqtt_span, parse_level, tool_span, LogFormat,
    LogSettings,
};
