pub mod cipher;
pub mod exchange;
pub mod identity;

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// CBC initialization vector length in bytes.
pub const IV_LEN: usize = 16;

/// The symmetric session key derived from a completed key exchange.
///
/// Exists only in memory for the lifetime of an open session; zeroized
/// when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl From<[u8; KEY_LEN]> for SessionKey {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for SessionKey {
    // Never print key bytes; a short fingerprint is enough to tell keys apart.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({}..)", hex::encode(&self.0[..4]))
    }
}
