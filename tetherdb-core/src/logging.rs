// src/logging.rs
// Embedded-friendly logging without an external logger dependency.

use std::sync::atomic::{AtomicU8, Ordering};

/// Log levels, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Critical failures that abort an operation
    Error = 0,
    /// Potential issues that don't stop execution (swallowed lock-release
    /// failures, skipped immutable-field writes, ...)
    Warn = 1,
    /// High-level operational information
    Info = 2,
    /// Detailed diagnostics (retry attempts, conflict reloads)
    Debug = 3,
}

impl LogLevel {
    /// Parse a log level name, case-insensitive
    pub fn parse(s: &str) -> Option<LogLevel> {
        match s.to_ascii_uppercase().as_str() {
            "ERROR" => Some(LogLevel::Error),
            "WARN" => Some(LogLevel::Warn),
            "INFO" => Some(LogLevel::Info),
            "DEBUG" => Some(LogLevel::Debug),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

// Default to Warn so library consumers only hear about real problems.
static ACTIVE_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);

/// Set the process-wide log level
pub fn set_log_level(level: LogLevel) {
    ACTIVE_LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Current process-wide log level
pub fn log_level() -> LogLevel {
    match ACTIVE_LOG_LEVEL.load(Ordering::Relaxed) {
        0 => LogLevel::Error,
        1 => LogLevel::Warn,
        2 => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}

#[inline]
pub fn enabled(level: LogLevel) -> bool {
    level <= log_level()
}

/// Sink for all log macros. Not part of the public API surface.
#[doc(hidden)]
pub fn emit(level: LogLevel, module: &str, message: &str) {
    if enabled(level) {
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        eprintln!("{} [{}] {}: {}", ts, level.as_str(), module, message);
    }
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::emit(
            $crate::logging::LogLevel::Error,
            module_path!(),
            &format!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::emit(
            $crate::logging::LogLevel::Warn,
            module_path!(),
            &format!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::emit(
            $crate::logging::LogLevel::Info,
            module_path!(),
            &format!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::emit(
            $crate::logging::LogLevel::Debug,
            module_path!(),
            &format!($($arg)*),
        )
    };
}
