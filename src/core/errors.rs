//! Display backend error types

use thiserror::Error;

/// Errors surfaced by the display backend.
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed message: {0}")]
    Framing(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("state error: {0}")]
    State(String),

    #[error("deferred chunk table full (capacity {0})")]
    DeferredTableFull(usize),

    #[error("unknown window id: {0:#018x}")]
    UnknownWindow(u64),

    #[error("system error: {0}")]
    Sys(#[from] nix::errno::Errno),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DisplayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn framing(msg: impl Into<String>) -> Self {
        Self::Framing(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }
}

/// Result type for display operations
pub type Result<T> = std::result::Result<T, DisplayError>;
