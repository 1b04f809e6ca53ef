//! Error types for Tagwire Core

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Queue is empty")]
    EmptyQueue,

    #[error("Message body underflow: needed {needed} bytes, {available} available")]
    BodyUnderflow { needed: usize, available: usize },

    #[error("Unknown message tag: {0}")]
    UnknownTag(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
