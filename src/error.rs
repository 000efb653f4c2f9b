use std::fmt;
use std::io;

/// Why a session left the handshake and entered its terminal state.
///
/// Every reason is detected locally and never echoed to the remote peer:
/// an attacker probing the handshake gets silence, not a distinguishing
/// "bad signature" versus "bad decryption" answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer certificate's self-signature did not verify.
    InvalidCertificate,
    /// A handshake message signature did not verify against the
    /// already-authenticated peer key.
    InvalidSignature,
    /// Ciphertext, key, or IV mismatch while processing a handshake message.
    DecryptionFailure,
    /// An event arrived in a state that does not expect it, or a handshake
    /// message carried a value no honest peer sends.
    ProtocolViolation,
    /// A handshake wait state outlived its deadline.
    Timeout,
    /// The underlying transport closed.
    TransportClosed,
    /// A local cryptographic operation failed while producing a message.
    Internal,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidCertificate => "invalid certificate",
            Self::InvalidSignature => "invalid signature",
            Self::DecryptionFailure => "decryption failure",
            Self::ProtocolViolation => "protocol violation",
            Self::Timeout => "timeout",
            Self::TransportClosed => "transport closed",
            Self::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Errors from frame parsing and encoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid magic bytes: expected 0x4B50, got 0x{0:04X}")]
    InvalidMagic(u16),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u32, max: u32 },

    #[error("truncated {0} payload")]
    Truncated(&'static str),

    #[error("{field} length {len} exceeds limit {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("trailing bytes after {0} payload")]
    TrailingBytes(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(#[source] rsa::Error),

    #[error("public key DER encoding failed")]
    KeyEncoding,

    #[error("peer public key is not valid DER")]
    InvalidKeyEncoding,

    #[error("certificate self-signature does not verify")]
    BadSelfSignature,

    #[error("signing failed")]
    SignFailed,

    #[error("asymmetric encryption failed")]
    AsymmetricEncryptFailed,

    #[error("asymmetric decryption failed")]
    AsymmetricDecryptFailed,

    #[error("symmetric decryption failed: ciphertext, key, or IV mismatch")]
    DecryptionFailed,

    #[error("invalid IV length: expected {expected}, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },

    #[error("degenerate exchange value: peer sent 0, 1, or p-1")]
    DegenerateExchangeValue,
}

/// Errors from session establishment and communication.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("handshake failed: {0}")]
    Handshake(CloseReason),

    #[error("handshake timed out")]
    Timeout,

    #[error("session closed: {0}")]
    Closed(CloseReason),

    #[error("transport closed")]
    TransportClosed,

    #[error("outbound queue full: {max} payloads already pending")]
    QueueFull { max: usize },

    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("peer key is not an authorized member")]
    Unauthorized,

    #[error("read buffer overflow: {size} bytes exceeds maximum")]
    ReadBufferOverflow { size: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
