pub mod codec;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::crypto::identity::Certificate;
use crate::error::FrameError;

/// Magic bytes: 0x4B 0x50 ("KP").
pub const MAGIC: u16 = 0x4B50;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Maximum application payload carried by a single data frame: 4 MiB.
pub const MAX_PAYLOAD_SIZE: u32 = 4 * 1024 * 1024;

/// Headroom on top of [`MAX_PAYLOAD_SIZE`] for what an [`Envelope`] wraps
/// around a maximum-size payload: block padding, the signature, the IV,
/// and the field length prefixes.
pub const ENVELOPE_OVERHEAD: u32 = 4096;

/// Hard cap on a frame payload as read off the wire.
pub const MAX_FRAME_PAYLOAD: u32 = MAX_PAYLOAD_SIZE + ENVELOPE_OVERHEAD;

/// Maximum length of a handshake field within a payload.
///
/// Certificates, signatures, and exchange ciphertexts are all well under
/// 64 KiB; the cap stops an adversarial length prefix from forcing a huge
/// allocation. Envelope ciphertexts carry application payloads and are
/// bounded by [`MAX_FRAME_PAYLOAD`] instead.
pub const MAX_FIELD_SIZE: usize = 64 * 1024;

/// Frame message types, one per handshake step plus the steady-state data
/// envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Certificate = 0x01,
    Exchange = 0x02,
    Ack = 0x03,
    Data = 0x04,
}

impl FrameType {
    pub fn from_u8(v: u8) -> std::result::Result<Self, FrameError> {
        match v {
            0x01 => Ok(Self::Certificate),
            0x02 => Ok(Self::Exchange),
            0x03 => Ok(Self::Ack),
            0x04 => Ok(Self::Data),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }
}

/// A parsed frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub msg_type: FrameType,
    pub payload_len: u32,
}

impl FrameHeader {
    /// Encode the header into bytes.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(MAGIC);
        buf.put_u8(self.version);
        buf.put_u8(self.msg_type as u8);
        buf.put_u32(self.payload_len);
    }

    /// Decode a header from a buffer. Returns `None` if not enough bytes.
    pub fn decode(buf: &mut BytesMut) -> std::result::Result<Option<Self>, FrameError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let magic = u16::from_be_bytes([buf[0], buf[1]]);
        if magic != MAGIC {
            return Err(FrameError::InvalidMagic(magic));
        }

        let version = buf[2];
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }

        let msg_type = FrameType::from_u8(buf[3])?;
        let payload_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        if payload_len > MAX_FRAME_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: MAX_FRAME_PAYLOAD,
            });
        }

        buf.advance(HEADER_SIZE);

        Ok(Some(Self {
            version,
            msg_type,
            payload_len,
        }))
    }
}

/// A complete frame: header + payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    fn new(msg_type: FrameType, payload: Bytes) -> Self {
        Self {
            header: FrameHeader {
                version: PROTOCOL_VERSION,
                msg_type,
                payload_len: payload.len() as u32,
            },
            payload,
        }
    }

    /// Certificate broadcast (step 1 or its mirror).
    pub fn certificate(msg: &CertificateMsg) -> Self {
        Self::new(FrameType::Certificate, msg.encode())
    }

    /// Encrypted, signed ephemeral exchange (step 2 or its mirror).
    pub fn exchange(msg: &ExchangeMsg) -> Self {
        Self::new(FrameType::Exchange, msg.encode())
    }

    /// Handshake completion marker, responder to initiator.
    pub fn ack() -> Self {
        Self::new(FrameType::Ack, Bytes::new())
    }

    /// Post-handshake data envelope.
    pub fn data(envelope: &Envelope) -> Self {
        Self::new(FrameType::Data, envelope.encode())
    }
}

fn put_field(buf: &mut BytesMut, field: &[u8]) {
    buf.put_u32(field.len() as u32);
    buf.put_slice(field);
}

fn get_field(
    buf: &mut Bytes,
    what: &'static str,
    max: usize,
) -> std::result::Result<Bytes, FrameError> {
    if buf.remaining() < 4 {
        return Err(FrameError::Truncated(what));
    }
    let len = buf.get_u32() as usize;
    if len > max {
        return Err(FrameError::FieldTooLong {
            field: what,
            len,
            max,
        });
    }
    if buf.remaining() < len {
        return Err(FrameError::Truncated(what));
    }
    Ok(buf.copy_to_bytes(len))
}

fn expect_consumed(buf: &Bytes, what: &'static str) -> std::result::Result<(), FrameError> {
    if buf.has_remaining() {
        return Err(FrameError::TrailingBytes(what));
    }
    Ok(())
}

/// Wire form of a self-signed certificate broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMsg {
    pub key_der: Bytes,
    pub self_sig: Bytes,
}

impl CertificateMsg {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + self.key_der.len() + self.self_sig.len());
        put_field(&mut buf, &self.key_der);
        put_field(&mut buf, &self.self_sig);
        buf.freeze()
    }

    pub fn decode(payload: Bytes) -> std::result::Result<Self, FrameError> {
        let mut buf = payload;
        let key_der = get_field(&mut buf, "certificate", MAX_FIELD_SIZE)?;
        let self_sig = get_field(&mut buf, "certificate", MAX_FIELD_SIZE)?;
        expect_consumed(&buf, "certificate")?;
        Ok(Self { key_der, self_sig })
    }
}

impl From<&Certificate> for CertificateMsg {
    fn from(cert: &Certificate) -> Self {
        Self {
            key_der: Bytes::copy_from_slice(cert.key_der()),
            self_sig: Bytes::copy_from_slice(cert.self_sig()),
        }
    }
}

/// Wire form of an ephemeral exchange broadcast: the local public value
/// encrypted under the peer key, and a signature over that ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeMsg {
    pub ciphertext: Bytes,
    pub signature: Bytes,
}

impl ExchangeMsg {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + self.ciphertext.len() + self.signature.len());
        put_field(&mut buf, &self.ciphertext);
        put_field(&mut buf, &self.signature);
        buf.freeze()
    }

    pub fn decode(payload: Bytes) -> std::result::Result<Self, FrameError> {
        let mut buf = payload;
        let ciphertext = get_field(&mut buf, "exchange", MAX_FIELD_SIZE)?;
        let signature = get_field(&mut buf, "exchange", MAX_FIELD_SIZE)?;
        expect_consumed(&buf, "exchange")?;
        Ok(Self {
            ciphertext,
            signature,
        })
    }
}

/// The post-handshake wire unit: symmetric ciphertext, a signature over the
/// ciphertext, and the IV the message was encrypted with.
///
/// Envelopes are independent of one another; there is no sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub ciphertext: Bytes,
    pub signature: Bytes,
    pub iv: Bytes,
}

impl Envelope {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            12 + self.ciphertext.len() + self.signature.len() + self.iv.len(),
        );
        put_field(&mut buf, &self.ciphertext);
        put_field(&mut buf, &self.signature);
        put_field(&mut buf, &self.iv);
        buf.freeze()
    }

    pub fn decode(payload: Bytes) -> std::result::Result<Self, FrameError> {
        let mut buf = payload;
        // The ciphertext can be as large as the payload it carries; only
        // the signature and IV are small fixed-size fields.
        let ciphertext = get_field(&mut buf, "envelope", MAX_FRAME_PAYLOAD as usize)?;
        let signature = get_field(&mut buf, "envelope", MAX_FIELD_SIZE)?;
        let iv = get_field(&mut buf, "envelope", MAX_FIELD_SIZE)?;
        expect_consumed(&buf, "envelope")?;
        Ok(Self {
            ciphertext,
            signature,
            iv,
        })
    }
}
