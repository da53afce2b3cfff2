//! Logging utilities
//!
//! Thin layer over the `log` facade with an `env_logger` backend.

pub use log::{debug, error, info, trace, warn};

use std::str::FromStr;

/// Log levels accepted on the command line
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum OgsLogLevel {
    None = 0,
    Fatal = 1,
    Error = 2,
    Warn = 3,
    #[default]
    Info = 4,
    Debug = 5,
    Trace = 6,
}

impl OgsLogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            OgsLogLevel::None => log::LevelFilter::Off,
            OgsLogLevel::Fatal | OgsLogLevel::Error => log::LevelFilter::Error,
            OgsLogLevel::Warn => log::LevelFilter::Warn,
            OgsLogLevel::Info => log::LevelFilter::Info,
            OgsLogLevel::Debug => log::LevelFilter::Debug,
            OgsLogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl FromStr for OgsLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(OgsLogLevel::None),
            "fatal" => Ok(OgsLogLevel::Fatal),
            "error" => Ok(OgsLogLevel::Error),
            "warn" | "warning" => Ok(OgsLogLevel::Warn),
            "info" => Ok(OgsLogLevel::Info),
            "debug" => Ok(OgsLogLevel::Debug),
            "trace" => Ok(OgsLogLevel::Trace),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Initialize logging with millisecond timestamps.
pub fn ogs_log_init(level: OgsLogLevel, no_color: bool) {
    let style = if no_color {
        env_logger::WriteStyle::Never
    } else {
        env_logger::WriteStyle::Auto
    };
    let _ = env_logger::Builder::new()
        .filter_level(level.to_filter())
        .write_style(style)
        .format_timestamp_millis()
        .try_init();
}
