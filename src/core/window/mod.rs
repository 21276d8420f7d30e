pub mod window;

#[cfg(test)]
mod tests;

pub use window::{Window, WindowConfig, WindowState};
