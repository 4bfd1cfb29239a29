//! Decode-Library Log Contract
//!
//! The decode library emits leveled text lines through its own logging
//! facility. Hosts that want those lines install a [`LogHandler`]; the
//! registry that dispatches to it lives in `core_runtime::logging`.

use std::fmt;

/// Severity levels of the decode library, lower is more severe.
///
/// The numeric values are the library's own and are preserved so a level can
/// be compared against a configured threshold without translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum LogLevel {
    Panic = 0,
    Fatal = 8,
    Error = 16,
    Warning = 24,
    Info = 32,
    Verbose = 40,
    Debug = 48,
    Trace = 56,
}

impl LogLevel {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Map a raw library level to the nearest named level at or above its
    /// severity.
    pub fn from_i32(level: i32) -> Self {
        match level {
            i32::MIN..=0 => Self::Panic,
            1..=8 => Self::Fatal,
            9..=16 => Self::Error,
            17..=24 => Self::Warning,
            25..=32 => Self::Info,
            33..=40 => Self::Verbose,
            41..=48 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Panic => "panic",
            Self::Fatal => "fatal",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Verbose => "verbose",
            Self::Debug => "debug",
            Self::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Receives log lines forwarded from the decode library.
///
/// Called synchronously on whichever thread produced the line; implementations
/// must be cheap and must not call back into the bridge.
pub trait LogHandler: Send + Sync {
    fn write_log(&self, level: LogLevel, message: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_levels_round_to_named_levels() {
        assert_eq!(LogLevel::from_i32(-8), LogLevel::Panic);
        assert_eq!(LogLevel::from_i32(16), LogLevel::Error);
        assert_eq!(LogLevel::from_i32(20), LogLevel::Warning);
        assert_eq!(LogLevel::from_i32(99), LogLevel::Trace);
        assert_eq!(LogLevel::Verbose.as_i32(), 40);
    }

    #[test]
    fn severity_ordering_follows_numeric_value() {
        assert!(LogLevel::Error < LogLevel::Warning);
        assert!(LogLevel::Trace > LogLevel::Debug);
    }
}
