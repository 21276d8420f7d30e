pub mod errors;
pub mod wayland;
pub mod window;

// Re-export key types
pub use errors::{DisplayError, Result};
pub use wayland::display::Display;
pub use window::{Window, WindowConfig, WindowState};
