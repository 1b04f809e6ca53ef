//! Tagged message frames
//!
//! A message is a fixed 8-byte header (tag + body length) followed by a
//! body of raw bytes. Typed values are appended to the body with
//! [`Message::push`] and consumed from the tail with [`Message::pop`], so
//! values come back out in reverse order of insertion.
//!
//! Both header fields use the host's native byte order. Peers on
//! architectures with a different endianness will not interoperate.

use std::fmt;

use crate::error::{Error, Result};

/// Size in bytes of an encoded [`MessageHeader`]
pub const HEADER_SIZE: usize = 8;

/// Application-defined message kind carried in every header.
///
/// The tag travels as a 4-byte integer, so implementors map themselves
/// onto `u32` and back. `from_raw` returns `None` for values the
/// application does not recognise; such frames are treated as protocol
/// errors by the transport.
pub trait MessageTag: Copy + fmt::Debug + PartialEq + Send + Sync + 'static {
    fn to_raw(self) -> u32;
    fn from_raw(raw: u32) -> Option<Self>;
}

impl MessageTag for u32 {
    fn to_raw(self) -> u32 {
        self
    }

    fn from_raw(raw: u32) -> Option<Self> {
        Some(raw)
    }
}

/// Fixed-size value that can be written into and read out of a body
pub trait BodyValue: Sized {
    /// Encoded width in bytes
    const SIZE: usize;

    /// Encode into `out`, which is exactly `SIZE` bytes long
    fn write_to(&self, out: &mut [u8]);

    /// Decode from `bytes`, which is exactly `SIZE` bytes long
    fn read_from(bytes: &[u8]) -> Self;
}

macro_rules! impl_body_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl BodyValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn write_to(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_ne_bytes());
                }

                fn read_from(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_body_value!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

impl BodyValue for bool {
    const SIZE: usize = 1;

    fn write_to(&self, out: &mut [u8]) {
        out[0] = u8::from(*self);
    }

    fn read_from(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

impl<V: BodyValue, const N: usize> BodyValue for [V; N] {
    const SIZE: usize = V::SIZE * N;

    fn write_to(&self, out: &mut [u8]) {
        for (value, chunk) in self.iter().zip(out.chunks_exact_mut(V::SIZE)) {
            value.write_to(chunk);
        }
    }

    fn read_from(bytes: &[u8]) -> Self {
        std::array::from_fn(|i| V::read_from(&bytes[i * V::SIZE..(i + 1) * V::SIZE]))
    }
}

/// Frame header: message kind and body length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader<T> {
    pub id: T,
    pub size: u32,
}

impl<T: MessageTag> MessageHeader<T> {
    /// Encode as `[tag][size]`, native byte order
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.id.to_raw().to_ne_bytes());
        out[4..].copy_from_slice(&self.size.to_ne_bytes());
        out
    }

    /// Decode a header, rejecting tags the application does not know
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let raw = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let size = u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let id = T::from_raw(raw).ok_or(Error::UnknownTag(raw))?;
        Ok(Self { id, size })
    }
}

/// A tagged message with a byte body
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    header: MessageHeader<T>,
    body: Vec<u8>,
}

impl<T: MessageTag> Message<T> {
    /// Create an empty message with the given tag
    pub fn new(id: T) -> Self {
        Self {
            header: MessageHeader { id, size: 0 },
            body: Vec::new(),
        }
    }

    /// Create a message from a tag and raw body bytes
    pub fn with_body(id: T, body: impl Into<Vec<u8>>) -> Self {
        let mut msg = Self {
            header: MessageHeader { id, size: 0 },
            body: body.into(),
        };
        msg.sync_size();
        msg
    }

    pub fn id(&self) -> T {
        self.header.id
    }

    pub fn header(&self) -> &MessageHeader<T> {
        &self.header
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Body length in bytes
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Append a typed value to the end of the body
    pub fn push<V: BodyValue>(&mut self, value: V) -> &mut Self {
        let start = self.body.len();
        self.body.resize(start + V::SIZE, 0);
        value.write_to(&mut self.body[start..]);
        self.sync_size();
        self
    }

    /// Remove a typed value from the end of the body.
    ///
    /// Fails without touching the body when fewer than `V::SIZE` bytes
    /// remain.
    pub fn pop<V: BodyValue>(&mut self) -> Result<V> {
        let available = self.body.len();
        if available < V::SIZE {
            return Err(Error::BodyUnderflow {
                needed: V::SIZE,
                available,
            });
        }

        let start = available - V::SIZE;
        let value = V::read_from(&self.body[start..]);
        self.body.truncate(start);
        self.sync_size();
        Ok(value)
    }

    /// Append raw bytes to the end of the body
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> &mut Self {
        self.body.extend_from_slice(bytes);
        self.sync_size();
        self
    }

    pub fn clear(&mut self) {
        self.body.clear();
        self.sync_size();
    }

    fn sync_size(&mut self) {
        self.header.size = self.body.len() as u32;
    }
}

impl<T: MessageTag> fmt::Display for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID: {:?} Size: {}", self.header.id, self.header.size)
    }
}
