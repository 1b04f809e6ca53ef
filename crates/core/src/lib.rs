//! Tagwire Core Library
//!
//! Transport-independent building blocks: tagged messages with a typed
//! body codec, and the blocking queue used to hand messages between
//! threads.

pub mod error;
pub mod message;
pub mod queue;

pub use error::{Error, Result};
pub use message::{BodyValue, Message, MessageHeader, MessageTag, HEADER_SIZE};
pub use queue::ThreadSafeQueue;
