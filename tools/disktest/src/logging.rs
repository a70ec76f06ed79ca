//! Stderr sink for the driver's log macros.

use core::fmt;

use disktest_core::log::{self, LogLevel};

fn stderr_log(level: LogLevel, args: fmt::Arguments<'_>) {
    eprintln!("[{}] {}", level.name(), args);
}

/// Routes driver output to stderr, dropping messages above `level`.
pub fn init(level: LogLevel) {
    log::set_log_fn(stderr_log);
    log::set_max_level(level);
}
