//! Standardized logging utility for the display core.
//!
//! This module provides the `elog!` macro which ensures milestone logs
//! follow the `YYYY-MM-DD HH:MM:SS [MODULE] Message` format. Per-event
//! wire traces go through `tracing` instead so they can be filtered.

#[macro_export]
macro_rules! elog {
    ($module:expr, $($arg:tt)*) => {{
        let now = chrono::Local::now();
        eprintln!("{} [{}] {}",
            now.format("%Y-%m-%d %H:%M:%S"),
            $module,
            format!($($arg)*)
        );
    }};
}

/// Standardized module identifiers
pub const MAIN: &str = "MAIN";
pub const DISPLAY: &str = "DISPLAY";
pub const WINDOW: &str = "WINDOW";
pub const SHM: &str = "SHM";
pub const SEAT: &str = "SEAT";
pub const WIRE: &str = "WIRE";
