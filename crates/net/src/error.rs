//! Network error types

use std::io;

use crate::connection::Role;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("Protocol error: {0}")]
    Protocol(#[from] tagwire_core::Error),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Operation not valid for a {0:?}-side connection")]
    WrongRole(Role),

    #[error("Already running")]
    AlreadyRunning,
}
