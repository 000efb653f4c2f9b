pub mod channel;
pub mod state;

use std::time::Duration;

use crate::error::{Error, SessionError};

/// Configuration for a secure session.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum application payload per send, in bytes (default: 4 MiB,
    /// the wire-level cap). Oversized sends are rejected locally.
    pub max_payload_size: u32,

    /// Deadline for each handshake wait state (default: 30s). A session
    /// stuck waiting past this closes with `CloseReason::Timeout`.
    pub handshake_timeout: Duration,

    /// Maximum payloads buffered before the handshake completes
    /// (default: 64). Sends past the cap are rejected, not dropped.
    pub max_queued_payloads: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_payload_size: crate::frame::MAX_PAYLOAD_SIZE,
            handshake_timeout: Duration::from_secs(30),
            max_queued_payloads: 64,
        }
    }
}

impl SessionConfig {
    /// Create a builder for constructing a `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    max_payload_size: u32,
    handshake_timeout: Duration,
    max_queued_payloads: usize,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            max_payload_size: defaults.max_payload_size,
            handshake_timeout: defaults.handshake_timeout,
            max_queued_payloads: defaults.max_queued_payloads,
        }
    }
}

impl SessionConfigBuilder {
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn max_queued_payloads(mut self, max: usize) -> Self {
        self.max_queued_payloads = max;
        self
    }

    /// Build the `SessionConfig`, validating that all values are sensible.
    pub fn build(self) -> Result<SessionConfig, Error> {
        if self.max_payload_size == 0 {
            return Err(Error::Session(SessionError::InvalidConfig(
                "max_payload_size must be > 0",
            )));
        }
        if self.max_payload_size > crate::frame::MAX_PAYLOAD_SIZE {
            return Err(Error::Session(SessionError::InvalidConfig(
                "max_payload_size must not exceed the wire-level cap",
            )));
        }
        if self.handshake_timeout.is_zero() {
            return Err(Error::Session(SessionError::InvalidConfig(
                "handshake_timeout must be > 0",
            )));
        }
        Ok(SessionConfig {
            max_payload_size: self.max_payload_size,
            handshake_timeout: self.handshake_timeout,
            max_queued_payloads: self.max_queued_payloads,
        })
    }
}
