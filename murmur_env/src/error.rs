//! Error types for the Murmur environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Link transmission failed (buffer full, link down, etc.)
    #[error("Link error: {0}")]
    LinkError(String),

    /// No device can reach the given address
    #[error("Address unreachable: {0}")]
    Unreachable(String),

    /// Frame exceeds the device MTU
    #[error("Frame of {size} bytes exceeds MTU {mtu}")]
    FrameTooLarge { size: usize, mtu: usize },

    /// Context operation failed
    #[error("Context error: {0}")]
    ContextError(String),
}

impl EnvError {
    /// Creates a link error.
    pub fn link(msg: impl Into<String>) -> Self {
        Self::LinkError(msg.into())
    }

    /// Creates an unreachable error.
    pub fn unreachable(addr: impl std::fmt::Display) -> Self {
        Self::Unreachable(addr.to_string())
    }
}
