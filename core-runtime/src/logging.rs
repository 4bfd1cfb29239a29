//! # Logging & Tracing Infrastructure
//!
//! Provides structured logging with the `tracing` crate, supporting:
//! - JSON, pretty-print and compact output formats
//! - Module-level filtering through `EnvFilter`
//! - Forwarding of decode-library log lines to a host [`LogHandler`]
//!
//! ## Overview
//!
//! Two independent facilities live here:
//!
//! 1. [`init_logging`] configures the `tracing-subscriber` registry for the
//!    bridge's own diagnostics. It may be called once per process.
//! 2. The library log registry ([`set_log_handler`], [`set_log_level`],
//!    [`forward_library_log`]) receives lines from the decode library. When a
//!    host handler is installed every line at or above the configured
//!    severity is handed to it verbatim; without a handler the line is
//!    emitted as a `tracing` event, which is the default behavior.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, set_log_handler, LogFormat, LoggingConfig};
//! use std::sync::Arc;
//!
//! init_logging(LoggingConfig::default().with_format(LogFormat::Compact))?;
//! set_log_handler(Some(Arc::new(MyHandler)));
//! ```

use crate::error::{Error, Result};
use bridge_traits::logging::{LogHandler, LogLevel};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format with colors
    Pretty,
    /// Structured JSON format for machine parsing
    Json,
    /// Compact format for production
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Compact;
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Minimum level for the bridge crates
    pub level: Level,
    /// Custom filter string (e.g., "core_playback=trace,symphonia=warn")
    pub filter: Option<String>,
    /// Enable span enter/exit events
    pub enable_spans: bool,
    /// Display target module in logs
    pub display_target: bool,
    /// Display thread info
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: Level::INFO,
            filter: None,
            enable_spans: false,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    pub fn with_thread_info(mut self, display: bool) -> Self {
        self.display_thread_info = display;
        self
    }
}

/// Initialize the logging system
///
/// Subsequent calls return [`Error::Config`] because a global subscriber is
/// already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;

    match config.format {
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(config.display_target)
                .with_thread_ids(config.display_thread_info)
                .with_thread_names(config.display_thread_info)
                .with_span_events(span_events(&config))
                .with_writer(io::stdout);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(config.enable_spans)
                .with_span_list(config.enable_spans)
                .with_target(config.display_target)
                .with_thread_ids(config.display_thread_info)
                .with_thread_names(config.display_thread_info)
                .with_writer(io::stdout);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
        }
        LogFormat::Compact => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(config.display_target)
                .with_thread_ids(config.display_thread_info)
                .with_thread_names(config.display_thread_info)
                .with_span_events(span_events(&config))
                .with_writer(io::stdout);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
        }
    }
    .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

fn span_events(config: &LoggingConfig) -> tracing_subscriber::fmt::format::FmtSpan {
    if config.enable_spans {
        tracing_subscriber::fmt::format::FmtSpan::ACTIVE
    } else {
        tracing_subscriber::fmt::format::FmtSpan::NONE
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let base_level = match config.level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    };

    let filter_string = if let Some(custom_filter) = &config.filter {
        custom_filter.clone()
    } else {
        // Our crates at the configured level, the decode library at warn
        format!(
            "core_runtime={level},core_playback={level},{}={level},symphonia=warn",
            LIBRARY_TARGET,
            level = base_level,
        )
    };

    EnvFilter::try_new(filter_string)
        .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
}

// ============================================================================
// Decode-library log forwarding
// ============================================================================

/// `tracing` target used for library lines when no host handler is set.
pub const LIBRARY_TARGET: &str = "decode_library";

static LOG_HANDLER: Lazy<RwLock<Option<Arc<dyn LogHandler>>>> = Lazy::new(|| RwLock::new(None));

static LIBRARY_LEVEL: AtomicI32 = AtomicI32::new(LogLevel::Info as i32);

/// Install or remove the process-wide library log handler.
///
/// Passing `None` restores default behavior.
pub fn set_log_handler(handler: Option<Arc<dyn LogHandler>>) {
    *LOG_HANDLER.write() = handler;
}

/// Currently installed library log handler, if any.
pub fn log_handler() -> Option<Arc<dyn LogHandler>> {
    LOG_HANDLER.read().clone()
}

/// Least severe library level that is still forwarded.
pub fn set_log_level(level: LogLevel) {
    LIBRARY_LEVEL.store(level.as_i32(), Ordering::Release);
}

pub fn log_level() -> LogLevel {
    LogLevel::from_i32(LIBRARY_LEVEL.load(Ordering::Acquire))
}

/// Forward one line from the decode library.
///
/// `source` names the emitting component (demuxer, codec) and is only used
/// for the default `tracing` output.
pub fn forward_library_log(level: LogLevel, source: &str, message: &str) {
    if level > log_level() {
        return;
    }

    let line = message.trim_end();

    // Clone out of the lock so a handler may replace itself.
    let handler = LOG_HANDLER.read().clone();
    if let Some(handler) = handler {
        handler.write_log(level, line);
        return;
    }

    match level {
        LogLevel::Panic | LogLevel::Fatal | LogLevel::Error => {
            tracing::error!(target: LIBRARY_TARGET, source, "{}", line)
        }
        LogLevel::Warning => tracing::warn!(target: LIBRARY_TARGET, source, "{}", line),
        LogLevel::Info => tracing::info!(target: LIBRARY_TARGET, source, "{}", line),
        LogLevel::Verbose | LogLevel::Debug => {
            tracing::debug!(target: LIBRARY_TARGET, source, "{}", line)
        }
        LogLevel::Trace => tracing::trace!(target: LIBRARY_TARGET, source, "{}", line),
    }
}
