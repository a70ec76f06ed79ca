//! Logging interface for disktest.
//!
//! Provides [`dlog!`] and the convenience macros (`dinfo!`, `ddebug!`, etc.)
//! for leveled logging. The driver never owns an output device; the embedding
//! program installs a sink with [`set_log_fn`]. Until then output is discarded.

use core::fmt;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

// ---------------------------------------------------------------------------
// Log levels, lower is more severe
// ---------------------------------------------------------------------------

/// Log severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Error: an operation failed.
    Error = 0,
    /// Warning: unexpected condition, not necessarily an error.
    Warn = 1,
    /// Informational: port scan results, controller capabilities.
    Info = 2,
    /// Debug: engine transitions and register dumps.
    Debug = 3,
    /// Trace: per-command slot and PRDT detail.
    Trace = 4,
}

impl LogLevel {
    /// Returns the human-readable name (fixed-width for aligned output).
    pub const fn name(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN ",
            Self::Info => "INFO ",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    /// Converts a raw level number, clamping unknown values to `Trace`.
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Error,
            1 => Self::Warn,
            2 => Self::Info,
            3 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

// ---------------------------------------------------------------------------
// Leveled log function (dlog! and convenience macros)
// ---------------------------------------------------------------------------

/// The signature of the global leveled log function.
pub type LogFn = fn(LogLevel, fmt::Arguments<'_>);

fn null_log(_level: LogLevel, _args: fmt::Arguments<'_>) {}

static LOG_FN: AtomicPtr<()> = AtomicPtr::new(null_log as *mut ());

/// Most verbose level forwarded to the sink.
static MAX_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Trace as u8);

/// Registers the global leveled log function.
///
/// May be called more than once; the latest registration wins.
pub fn set_log_fn(f: LogFn) {
    LOG_FN.store(f as *mut (), Ordering::Release);
}

/// Sets the most verbose level that reaches the sink.
pub fn set_max_level(level: LogLevel) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Returns the most verbose level that reaches the sink.
pub fn max_level() -> LogLevel {
    LogLevel::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
}

#[inline]
fn load_log_fn() -> LogFn {
    let ptr = LOG_FN.load(Ordering::Acquire);
    // SAFETY: We only ever store valid `LogFn` function pointers into LOG_FN.
    unsafe { core::mem::transmute::<*mut (), LogFn>(ptr) }
}

/// Implementation detail for [`dlog!`]. Not public API.
#[doc(hidden)]
pub fn _log(level: LogLevel, args: fmt::Arguments<'_>) {
    if level <= max_level() {
        load_log_fn()(level, args);
    }
}

/// Logs a message at the given level.
#[macro_export]
macro_rules! dlog {
    ($level:expr, $($arg:tt)*) => {
        $crate::log::_log($level, format_args!($($arg)*))
    };
}

/// Logs an error-level message (level 0).
#[macro_export]
macro_rules! derror {
    ($($arg:tt)*) => { $crate::dlog!($crate::log::LogLevel::Error, $($arg)*) };
}

/// Logs a warning-level message (level 1).
#[macro_export]
macro_rules! dwarn {
    ($($arg:tt)*) => { $crate::dlog!($crate::log::LogLevel::Warn, $($arg)*) };
}

/// Logs an info-level message (level 2).
#[macro_export]
macro_rules! dinfo {
    ($($arg:tt)*) => { $crate::dlog!($crate::log::LogLevel::Info, $($arg)*) };
}

/// Logs a debug-level message (level 3).
#[macro_export]
macro_rules! ddebug {
    ($($arg:tt)*) => { $crate::dlog!($crate::log::LogLevel::Debug, $($arg)*) };
}

/// Logs a trace-level message (level 4).
#[macro_export]
macro_rules! dtrace {
    ($($arg:tt)*) => { $crate::dlog!($crate::log::LogLevel::Trace, $($arg)*) };
}
