//! Connection validation handshake
//!
//! The server writes a random 8-byte challenge as soon as a connection is
//! armed. The client must answer with `respond(challenge)`; the server
//! computes the same value and drops the peer on mismatch. Both values
//! travel in native byte order.

/// Challenge-response scheme shared by client and server
pub trait Handshake: Send + Sync + 'static {
    /// Expected answer for a challenge. Both ends must agree on this.
    fn respond(&self, challenge: u64) -> u64;

    /// Fresh challenge for a new connection
    fn challenge(&self) -> u64 {
        rand::random()
    }
}

/// Default scheme: keyed bit mixing of the challenge
#[derive(Debug, Clone, Copy)]
pub struct Scramble {
    key: u64,
}

impl Scramble {
    pub const DEFAULT_KEY: u64 = 0x7A67_7769_7265_0001;

    pub fn new(key: u64) -> Self {
        Self { key }
    }
}

impl Default for Scramble {
    fn default() -> Self {
        Self::new(Self::DEFAULT_KEY)
    }
}

impl Handshake for Scramble {
    fn respond(&self, challenge: u64) -> u64 {
        let mixed = (challenge ^ self.key).rotate_left(23);
        (mixed ^ (mixed >> 29)).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }
}
