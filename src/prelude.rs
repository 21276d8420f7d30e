//! Common imports and types used throughout the display core.

pub use crate::core::errors::{DisplayError, Result};
pub use crate::core::wayland::display::Display;
pub use crate::core::window::{WindowConfig, WindowState};
