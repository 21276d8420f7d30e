// Tioga Engine - display core
// Copyright (c) 2026
//
// Rust-first display/windowing backend. Speaks the Wayland wire protocol
// directly over a Unix domain socket; the rest of the engine only ever
// sees window ids and the per-frame pump.

pub mod core;
pub mod prelude;
pub mod util;

pub use crate::core::errors::{DisplayError, Result};
pub use crate::core::wayland::display::Display;
pub use crate::core::window::{Window, WindowConfig, WindowState};
