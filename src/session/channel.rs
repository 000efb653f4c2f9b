use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder};

use crate::crypto::identity::{Identity, PeerKey};
use crate::crypto::SessionKey;
use crate::error::{CloseReason, Error, SessionError};
use crate::frame::codec::FrameCodec;
use crate::frame::Frame;
use crate::registry::MembershipRegistry;

use super::state::{Event, Output, Role, Session, State};
use super::SessionConfig;

/// Maximum bytes buffered while waiting for a complete frame.
///
/// Handshake messages are a few KiB at most; data frames are bounded by the
/// payload cap. Anything past this is a peer that refuses to produce a
/// parseable frame.
const MAX_READ_BUF: usize =
    crate::frame::MAX_FRAME_PAYLOAD as usize + crate::frame::HEADER_SIZE + 4096;

/// An authenticated, encrypted channel over any ordered, reliable transport.
///
/// The transport must deliver bytes in order and without loss per
/// connection; the protocol treats reordering as a violation rather than
/// tolerating it. One channel per connection; channels share no state and
/// run concurrently without coordination.
pub struct SecureChannel<T> {
    transport: T,
    session: Session,
    codec: FrameCodec,
    read_buf: BytesMut,
}

impl<T: AsyncRead + AsyncWrite + Unpin> SecureChannel<T> {
    /// Establish a channel as the initiator (client role).
    ///
    /// Drives the four-message handshake, then asks the registry whether
    /// the peer's now-authenticated key is an authorized member. Each
    /// handshake wait state is bounded by `config.handshake_timeout`.
    pub async fn connect(
        transport: T,
        identity: Identity,
        registry: &dyn MembershipRegistry,
        config: SessionConfig,
    ) -> Result<Self, Error> {
        Self::establish(Role::Initiator, transport, identity, registry, config).await
    }

    /// Establish a channel as the responder (server role).
    pub async fn accept(
        transport: T,
        identity: Identity,
        registry: &dyn MembershipRegistry,
        config: SessionConfig,
    ) -> Result<Self, Error> {
        Self::establish(Role::Responder, transport, identity, registry, config).await
    }

    async fn establish(
        role: Role,
        transport: T,
        identity: Identity,
        registry: &dyn MembershipRegistry,
        config: SessionConfig,
    ) -> Result<Self, Error> {
        let mut channel = Self {
            transport,
            session: Session::new(role, identity, &config),
            codec: FrameCodec::default(),
            read_buf: BytesMut::with_capacity(4096),
        };

        let outputs = channel.session.start();
        channel.write_outputs(outputs).await?;

        while !channel.session.is_open() {
            let frame = match timeout(config.handshake_timeout, channel.recv_frame()).await {
                Ok(result) => result?,
                Err(_) => {
                    channel.session.close(CloseReason::Timeout);
                    return Err(SessionError::Timeout.into());
                }
            };
            let event = match Event::from_frame(frame) {
                Ok(event) => event,
                Err(err) => {
                    channel.session.close(CloseReason::ProtocolViolation);
                    return Err(err.into());
                }
            };
            let outputs = channel.session.handle(event);
            channel.write_outputs(outputs).await?;
            if let Some(reason) = channel.session.close_reason() {
                return Err(SessionError::Handshake(reason).into());
            }
        }

        // The handshake proved key possession; admission is the registry's
        // call, made here at the application boundary.
        let peer = channel.session.peer_key().expect("peer key present once open");
        if !registry.is_authorized(peer.key_der()).await {
            tracing::warn!(peer = %peer.fingerprint(), "peer key rejected by registry");
            return Err(SessionError::Unauthorized.into());
        }

        tracing::info!(?role, peer = %peer.fingerprint(), "secure channel established");
        Ok(channel)
    }

    /// Encrypt, sign, and write a payload.
    ///
    /// A caller only ever holds an open channel, so this writes immediately;
    /// pre-open queueing lives in [`Session`].
    pub async fn send(&mut self, payload: Bytes) -> Result<(), Error> {
        let outputs = self.session.send(payload)?;
        self.write_outputs(outputs).await
    }

    /// Receive the next application payload.
    ///
    /// Envelopes failing signature or decryption checks are dropped without
    /// surfacing an error — the loop keeps reading. A handshake frame
    /// arriving post-open closes the session and errors.
    pub async fn recv(&mut self) -> Result<Bytes, Error> {
        loop {
            let frame = self.recv_frame().await?;
            let event = match Event::from_frame(frame) {
                Ok(event) => event,
                Err(err) => {
                    self.session.close(CloseReason::ProtocolViolation);
                    return Err(err.into());
                }
            };

            let outputs = self.session.handle(event);
            let mut delivered = None;
            let mut write_buf = BytesMut::new();
            for output in outputs {
                match output {
                    Output::Send(frame) => {
                        self.codec.encode(frame, &mut write_buf).map_err(Error::Frame)?;
                    }
                    Output::Deliver(payload) => delivered = Some(payload),
                    Output::Opened => {}
                }
            }
            if !write_buf.is_empty() {
                self.transport.write_all(&write_buf).await.map_err(Error::Io)?;
                self.transport.flush().await.map_err(Error::Io)?;
            }

            if let Some(reason) = self.session.close_reason() {
                return Err(SessionError::Closed(reason).into());
            }
            if let Some(payload) = delivered {
                return Ok(payload);
            }
        }
    }

    pub fn state(&self) -> State {
        self.session.state()
    }

    /// The peer key authenticated during the handshake.
    pub fn peer_key(&self) -> Option<&PeerKey> {
        self.session.peer_key()
    }

    /// The derived session key; present once the channel is open.
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session.session_key()
    }

    async fn recv_frame(&mut self) -> Result<Frame, Error> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf).map_err(Error::Frame)? {
                return Ok(frame);
            }
            if self.read_buf.len() > MAX_READ_BUF {
                return Err(SessionError::ReadBufferOverflow {
                    size: self.read_buf.len(),
                }
                .into());
            }
            let n = self
                .transport
                .read_buf(&mut self.read_buf)
                .await
                .map_err(Error::Io)?;
            if n == 0 {
                self.session.handle(Event::TransportClosed);
                return Err(SessionError::TransportClosed.into());
            }
        }
    }

    async fn write_outputs(&mut self, outputs: Vec<Output>) -> Result<(), Error> {
        let mut buf = BytesMut::new();
        for output in outputs {
            if let Output::Send(frame) = output {
                self.codec.encode(frame, &mut buf).map_err(Error::Frame)?;
            }
        }
        if !buf.is_empty() {
            self.transport.write_all(&buf).await.map_err(Error::Io)?;
            self.transport.flush().await.map_err(Error::Io)?;
        }
        Ok(())
    }
}
