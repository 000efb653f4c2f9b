use std::collections::VecDeque;

use bytes::Bytes;

use crate::crypto::cipher;
use crate::crypto::exchange::EphemeralExchange;
use crate::crypto::identity::{Certificate, Identity, PeerKey};
use crate::crypto::SessionKey;
use crate::error::{CloseReason, CryptoError, Error, FrameError, SessionError};
use crate::frame::{CertificateMsg, Envelope, ExchangeMsg, Frame, FrameType};
use crate::session::SessionConfig;

/// Which side of the handshake this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The connecting client. Waits for the responder's certificate
    /// broadcast and resolves once the acknowledgment arrives.
    Initiator,
    /// The accepting service. Broadcasts its certificate as soon as the
    /// connection exists and sends the acknowledgment.
    Responder,
}

/// Handshake progress.
///
/// Strictly forward: no state is ever revisited, and `Closed` is absorbing.
/// A failed handshake is never retried on the same session; a new connection
/// gets a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AwaitPeerCertificate,
    AwaitPeerExchange,
    AwaitAck,
    Open,
    Closed(CloseReason),
}

/// Inbound events a session reacts to: one per wire frame, plus closure of
/// the underlying transport.
#[derive(Debug)]
pub enum Event {
    Certificate(CertificateMsg),
    Exchange(ExchangeMsg),
    Ack,
    Data(Envelope),
    TransportClosed,
}

impl Event {
    /// Parse a wire frame into the event it carries.
    pub fn from_frame(frame: Frame) -> Result<Self, FrameError> {
        match frame.header.msg_type {
            FrameType::Certificate => Ok(Self::Certificate(CertificateMsg::decode(frame.payload)?)),
            FrameType::Exchange => Ok(Self::Exchange(ExchangeMsg::decode(frame.payload)?)),
            FrameType::Ack => {
                if !frame.payload.is_empty() {
                    return Err(FrameError::TrailingBytes("ack"));
                }
                Ok(Self::Ack)
            }
            FrameType::Data => Ok(Self::Data(Envelope::decode(frame.payload)?)),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Certificate(_) => "certificate",
            Self::Exchange(_) => "exchange",
            Self::Ack => "ack",
            Self::Data(_) => "data",
            Self::TransportClosed => "transport-closed",
        }
    }
}

/// What a transition asks the caller to do.
#[derive(Debug)]
pub enum Output {
    /// Write this frame to the transport.
    Send(Frame),
    /// Hand this decrypted payload to the application.
    Deliver(Bytes),
    /// The handshake just completed.
    Opened,
}

/// One end of a mutually-authenticated session: the handshake state machine
/// plus the post-handshake send/receive discipline.
///
/// The machine is purely event-reactive and does no I/O of its own; callers
/// feed it events one at a time and act on the outputs. `&mut self` on every
/// transition is what serializes access to the mutable state — two events
/// cannot race a transition by construction.
///
/// Both roles share one transition table, dispatched on `(state, event)`
/// with role-specific replies, instead of two hand-synchronized copies.
pub struct Session {
    role: Role,
    state: State,
    identity: Identity,
    peer_key: Option<PeerKey>,
    ephemeral: Option<EphemeralExchange>,
    session_key: Option<SessionKey>,
    outbound: VecDeque<Bytes>,
    max_queued: usize,
    max_payload: usize,
}

impl Session {
    pub fn new(role: Role, identity: Identity, config: &SessionConfig) -> Self {
        Self {
            role,
            state: State::AwaitPeerCertificate,
            identity,
            peer_key: None,
            ephemeral: None,
            session_key: None,
            outbound: VecDeque::new(),
            max_queued: config.max_queued_payloads,
            max_payload: config.max_payload_size as usize,
        }
    }

    /// Frames to write as soon as the connection exists.
    ///
    /// The responder opens with its certificate broadcast; the initiator
    /// has nothing to say until that broadcast arrives.
    pub fn start(&mut self) -> Vec<Output> {
        match self.role {
            Role::Responder => vec![Output::Send(Frame::certificate(&CertificateMsg::from(
                self.identity.certificate(),
            )))],
            Role::Initiator => Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        match self.state {
            State::Closed(reason) => Some(reason),
            _ => None,
        }
    }

    /// The peer key accepted during the handshake, for registry lookups.
    pub fn peer_key(&self) -> Option<&PeerKey> {
        self.peer_key.as_ref()
    }

    /// The derived session key, once the key exchange has completed.
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    /// Number of payloads waiting for the handshake to complete.
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    /// Force the session closed, e.g. when a wait-state deadline fires or
    /// the transport goes away. Idempotent; the first reason wins.
    pub fn close(&mut self, reason: CloseReason) {
        if let State::Closed(_) = self.state {
            return;
        }
        tracing::debug!(role = ?self.role, %reason, "session closed");
        self.state = State::Closed(reason);
        // Cryptographic state lives only as long as the session.
        self.ephemeral = None;
        self.session_key = None;
        self.outbound.clear();
    }

    /// Apply one inbound event.
    ///
    /// Handshake failures close the session and produce no outputs; nothing
    /// about the failure is echoed to the peer. Events arriving after close
    /// are ignored. An event in a state that does not expect it closes the
    /// session with `ProtocolViolation`.
    pub fn handle(&mut self, event: Event) -> Vec<Output> {
        if let State::Closed(_) = self.state {
            return Vec::new();
        }
        match (self.state, event) {
            (_, Event::TransportClosed) => {
                self.close(CloseReason::TransportClosed);
                Vec::new()
            }
            (State::AwaitPeerCertificate, Event::Certificate(msg)) => self.on_certificate(msg),
            (State::AwaitPeerExchange, Event::Exchange(msg)) => self.on_exchange(msg),
            (State::AwaitAck, Event::Ack) => self.on_ack(),
            (State::Open, Event::Data(envelope)) => self.on_data(envelope),
            (state, event) => {
                tracing::warn!(?state, event = event.name(), "event out of order");
                self.close(CloseReason::ProtocolViolation);
                Vec::new()
            }
        }
    }

    /// Submit an application payload.
    ///
    /// Open: encrypt, sign the ciphertext, emit the envelope immediately.
    /// Still handshaking: append to the bounded outbound queue and return
    /// without blocking; the queue flushes FIFO the moment the session
    /// opens. Closed: error.
    ///
    /// Payloads over `max_payload_size` are rejected here, before they
    /// reach the wire; the peer would refuse the resulting frame anyway.
    pub fn send(&mut self, payload: Bytes) -> Result<Vec<Output>, Error> {
        if payload.len() > self.max_payload {
            return Err(SessionError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            }
            .into());
        }
        match self.state {
            State::Closed(reason) => Err(SessionError::Closed(reason).into()),
            State::Open => Ok(vec![Output::Send(self.seal(&payload)?)]),
            _ => {
                if self.outbound.len() >= self.max_queued {
                    return Err(SessionError::QueueFull {
                        max: self.max_queued,
                    }
                    .into());
                }
                self.outbound.push_back(payload);
                Ok(Vec::new())
            }
        }
    }

    fn on_certificate(&mut self, msg: CertificateMsg) -> Vec<Output> {
        let cert = Certificate::new(msg.key_der.to_vec(), msg.self_sig.to_vec());
        let peer = match cert.verify_self_signed() {
            Ok(peer) => peer,
            Err(err) => {
                tracing::warn!(%err, "peer certificate rejected");
                self.close(CloseReason::InvalidCertificate);
                return Vec::new();
            }
        };
        tracing::debug!(peer = %peer.fingerprint(), "peer certificate verified");
        self.peer_key = Some(peer);
        self.state = State::AwaitPeerExchange;

        match self.role {
            // Answer with our ephemeral exchange, encrypted under the peer
            // key and signed over the ciphertext.
            Role::Responder => {
                let exchange = EphemeralExchange::generate();
                let frame = match self.exchange_frame(&exchange) {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::warn!(%err, "failed to build exchange message");
                        self.close(CloseReason::Internal);
                        return Vec::new();
                    }
                };
                self.ephemeral = Some(exchange);
                vec![Output::Send(frame)]
            }
            // Answer the certificate broadcast with our own certificate.
            Role::Initiator => vec![Output::Send(Frame::certificate(&CertificateMsg::from(
                self.identity.certificate(),
            )))],
        }
    }

    fn on_exchange(&mut self, msg: ExchangeMsg) -> Vec<Output> {
        // The signature must verify against the certificate accepted in the
        // previous step, never key material carried in this message; that
        // is what rules out a mid-handshake identity swap.
        let peer = self
            .peer_key
            .as_ref()
            .expect("peer key is set before AwaitPeerExchange");
        if !peer.verify(&msg.ciphertext, &msg.signature) {
            self.close(CloseReason::InvalidSignature);
            return Vec::new();
        }

        let remote_public = match self.identity.decrypt(&msg.ciphertext) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(%err, "exchange ciphertext rejected");
                self.close(CloseReason::DecryptionFailure);
                return Vec::new();
            }
        };

        match self.role {
            Role::Responder => {
                let exchange = self
                    .ephemeral
                    .take()
                    .expect("responder generated its exchange on certificate receipt");
                if !self.derive_session_key(&exchange, &remote_public) {
                    return Vec::new();
                }
                self.state = State::Open;
                tracing::debug!("handshake complete, acknowledging");
                let mut outputs = vec![Output::Send(Frame::ack()), Output::Opened];
                outputs.extend(self.flush_queue());
                outputs
            }
            Role::Initiator => {
                let exchange = EphemeralExchange::generate();
                let frame = match self.exchange_frame(&exchange) {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::warn!(%err, "failed to build exchange message");
                        self.close(CloseReason::Internal);
                        return Vec::new();
                    }
                };
                if !self.derive_session_key(&exchange, &remote_public) {
                    return Vec::new();
                }
                self.state = State::AwaitAck;
                vec![Output::Send(frame)]
            }
        }
    }

    fn on_ack(&mut self) -> Vec<Output> {
        self.state = State::Open;
        tracing::debug!("acknowledgment received, session open");
        let mut outputs = vec![Output::Opened];
        outputs.extend(self.flush_queue());
        outputs
    }

    fn on_data(&mut self, envelope: Envelope) -> Vec<Output> {
        let peer = self
            .peer_key
            .as_ref()
            .expect("peer key is set before Open");
        // Post-handshake failures are dropped, not fatal: one malformed or
        // injected envelope must not tear down a healthy channel, and
        // silence denies an attacker a verification oracle.
        if !peer.verify(&envelope.ciphertext, &envelope.signature) {
            tracing::warn!("dropping envelope with bad signature");
            return Vec::new();
        }
        let key = self.session_key.as_ref().expect("session key set at open");
        match cipher::decrypt(&envelope.ciphertext, key, &envelope.iv) {
            Ok(payload) => vec![Output::Deliver(Bytes::from(payload))],
            Err(err) => {
                tracing::warn!(%err, "dropping undecryptable envelope");
                Vec::new()
            }
        }
    }

    /// Encrypt our public exchange value under the peer key and sign the
    /// ciphertext. Encryption hides the value from passive observers; the
    /// signature binds it to our already-exchanged certificate.
    fn exchange_frame(&self, exchange: &EphemeralExchange) -> Result<Frame, CryptoError> {
        let peer = self
            .peer_key
            .as_ref()
            .expect("exchange is only built after the peer certificate");
        let ciphertext = peer.encrypt(&exchange.public_value())?;
        let signature = self.identity.sign(&ciphertext)?;
        Ok(Frame::exchange(&ExchangeMsg {
            ciphertext: Bytes::from(ciphertext),
            signature: Bytes::from(signature),
        }))
    }

    /// Compute the shared secret and derive the symmetric key. On failure
    /// closes the session and returns false.
    fn derive_session_key(&mut self, exchange: &EphemeralExchange, remote_public: &[u8]) -> bool {
        match exchange.compute_shared_secret(remote_public) {
            Ok(secret) => {
                self.session_key = Some(cipher::derive_key(&secret));
                true
            }
            Err(err) => {
                // The plaintext decrypted fine; its value is one an honest
                // peer never sends.
                tracing::warn!(%err, "key agreement rejected");
                self.close(CloseReason::ProtocolViolation);
                false
            }
        }
    }

    /// Emit everything queued before the handshake completed, in submission
    /// order. The queue stays permanently empty afterwards; later sends go
    /// straight to the wire.
    fn flush_queue(&mut self) -> Vec<Output> {
        let mut outputs = Vec::with_capacity(self.outbound.len());
        while let Some(payload) = self.outbound.pop_front() {
            match self.seal(&payload) {
                Ok(frame) => outputs.push(Output::Send(frame)),
                Err(err) => {
                    tracing::warn!(%err, "failed to seal queued payload");
                    self.close(CloseReason::Internal);
                    return Vec::new();
                }
            }
        }
        outputs
    }

    fn seal(&self, payload: &[u8]) -> Result<Frame, CryptoError> {
        let key = self.session_key.as_ref().expect("sealing requires an open session");
        let (ciphertext, iv) = cipher::encrypt(payload, key);
        let signature = self.identity.sign(&ciphertext)?;
        Ok(Frame::data(&Envelope {
            ciphertext: Bytes::from(ciphertext),
            signature: Bytes::from(signature),
            iv: Bytes::copy_from_slice(&iv),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    const TEST_KEY_BITS: usize = 1024;

    static RESPONDER_ID: Lazy<Identity> =
        Lazy::new(|| Identity::generate(TEST_KEY_BITS).expect("keygen"));
    static INITIATOR_ID: Lazy<Identity> =
        Lazy::new(|| Identity::generate(TEST_KEY_BITS).expect("keygen"));

    fn pair() -> (Session, Session) {
        let config = SessionConfig::default();
        (
            Session::new(Role::Responder, RESPONDER_ID.clone(), &config),
            Session::new(Role::Initiator, INITIATOR_ID.clone(), &config),
        )
    }

    fn frames_of(outputs: Vec<Output>) -> Vec<Frame> {
        outputs
            .into_iter()
            .filter_map(|output| match output {
                Output::Send(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    /// Shuttle frames between the two machines until neither produces more.
    /// Returns the data frames the responder emitted along the way.
    fn run_handshake(responder: &mut Session, initiator: &mut Session) -> Vec<Frame> {
        let mut to_initiator = frames_of(responder.start());
        let mut to_responder = frames_of(initiator.start());
        let mut responder_data = Vec::new();

        while !(to_initiator.is_empty() && to_responder.is_empty()) {
            let mut next_to_responder = Vec::new();
            for frame in to_initiator.drain(..) {
                let event = Event::from_frame(frame).expect("well-formed frame");
                next_to_responder.extend(frames_of(initiator.handle(event)));
            }
            for frame in to_responder.drain(..) {
                let event = Event::from_frame(frame).expect("well-formed frame");
                for frame in frames_of(responder.handle(event)) {
                    if frame.header.msg_type == FrameType::Data {
                        responder_data.push(frame);
                    } else {
                        to_initiator.push(frame);
                    }
                }
            }
            to_responder = next_to_responder;
        }
        responder_data
    }

    #[test]
    fn full_handshake_opens_both_sides_with_one_key() {
        let (mut responder, mut initiator) = pair();
        run_handshake(&mut responder, &mut initiator);

        assert_eq!(responder.state(), State::Open);
        assert_eq!(initiator.state(), State::Open);
        assert_eq!(
            responder.session_key().expect("responder key"),
            initiator.session_key().expect("initiator key"),
        );
    }

    #[test]
    fn data_roundtrip_after_open() {
        let (mut responder, mut initiator) = pair();
        run_handshake(&mut responder, &mut initiator);

        let outputs = initiator.send(Bytes::from_static(b"payload")).unwrap();
        let frames = frames_of(outputs);
        assert_eq!(frames.len(), 1);

        let event = Event::from_frame(frames.into_iter().next().unwrap()).unwrap();
        let delivered = responder.handle(event);
        assert!(matches!(
            &delivered[..],
            [Output::Deliver(payload)] if &payload[..] == b"payload"
        ));
    }

    #[test]
    fn invalid_certificate_closes_without_a_key() {
        let (mut responder, mut initiator) = pair();
        let mut broadcast = frames_of(responder.start());
        let frame = broadcast.pop().unwrap();

        let mut msg = CertificateMsg::decode(frame.payload).unwrap();
        let mut sig = msg.self_sig.to_vec();
        sig[0] ^= 0x01;
        msg.self_sig = Bytes::from(sig);

        let outputs = initiator.handle(Event::Certificate(msg));
        assert!(outputs.is_empty());
        assert_eq!(
            initiator.state(),
            State::Closed(CloseReason::InvalidCertificate)
        );
        assert!(initiator.session_key().is_none());
    }

    #[test]
    fn tampered_exchange_signature_closes() {
        let (mut responder, mut initiator) = pair();

        // Responder's certificate reaches the initiator, which replies with
        // its own; the responder then emits its exchange message.
        let cert = frames_of(responder.start()).pop().unwrap();
        let reply = frames_of(initiator.handle(Event::from_frame(cert).unwrap()))
            .pop()
            .unwrap();
        let exchange = frames_of(responder.handle(Event::from_frame(reply).unwrap()))
            .pop()
            .unwrap();

        let mut msg = ExchangeMsg::decode(exchange.payload).unwrap();
        let mut sig = msg.signature.to_vec();
        sig[0] ^= 0x01;
        msg.signature = Bytes::from(sig);

        initiator.handle(Event::Exchange(msg));
        assert_eq!(
            initiator.state(),
            State::Closed(CloseReason::InvalidSignature)
        );
        assert!(initiator.session_key().is_none());
    }

    #[test]
    fn degenerate_exchange_value_is_a_protocol_violation() {
        let (mut responder, mut initiator) = pair();
        let cert = frames_of(responder.start()).pop().unwrap();
        initiator.handle(Event::from_frame(cert).unwrap());
        assert_eq!(initiator.state(), State::AwaitPeerExchange);

        // A well-signed exchange carrying the value 1 would pin the shared
        // secret to 1; the machine must refuse the value itself.
        let initiator_key = INITIATOR_ID.certificate().verify_self_signed().unwrap();
        let ciphertext = initiator_key.encrypt(&[1]).unwrap();
        let signature = RESPONDER_ID.sign(&ciphertext).unwrap();
        let outputs = initiator.handle(Event::Exchange(ExchangeMsg {
            ciphertext: Bytes::from(ciphertext),
            signature: Bytes::from(signature),
        }));

        assert!(outputs.is_empty());
        assert_eq!(
            initiator.state(),
            State::Closed(CloseReason::ProtocolViolation)
        );
        assert!(initiator.session_key().is_none());
    }

    #[test]
    fn payload_larger_than_a_handshake_field_roundtrips() {
        let (mut responder, mut initiator) = pair();
        run_handshake(&mut responder, &mut initiator);

        let payload = Bytes::from(vec![0x5A; 80_000]);
        let frames = frames_of(initiator.send(payload.clone()).unwrap());
        assert_eq!(frames.len(), 1);

        let event = Event::from_frame(frames.into_iter().next().unwrap())
            .expect("a large envelope still parses");
        let delivered = responder.handle(event);
        assert!(matches!(
            &delivered[..],
            [Output::Deliver(got)] if got == &payload
        ));
    }

    #[test]
    fn oversized_send_rejected_locally() {
        let config = SessionConfig::builder()
            .max_payload_size(1024)
            .build()
            .unwrap();
        let mut responder = Session::new(Role::Responder, RESPONDER_ID.clone(), &config);
        let mut initiator = Session::new(Role::Initiator, INITIATOR_ID.clone(), &config);
        run_handshake(&mut responder, &mut initiator);

        let err = initiator.send(Bytes::from(vec![0u8; 2048])).unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::PayloadTooLarge {
                size: 2048,
                max: 1024
            })
        ));
        assert!(initiator.is_open());
    }

    #[test]
    fn queued_payloads_flush_in_fifo_order() {
        let (mut responder, mut initiator) = pair();

        for payload in [&b"P1"[..], b"P2", b"P3"] {
            let outputs = initiator.send(Bytes::copy_from_slice(payload)).unwrap();
            assert!(outputs.is_empty(), "pre-open send must queue");
        }
        assert_eq!(initiator.queued(), 3);

        // Drive the handshake to completion by hand so we can observe the
        // initiator's flush outputs on the ack.
        let cert = frames_of(responder.start()).pop().unwrap();
        let own_cert = frames_of(initiator.handle(Event::from_frame(cert).unwrap()))
            .pop()
            .unwrap();
        let responder_exchange =
            frames_of(responder.handle(Event::from_frame(own_cert).unwrap()))
                .pop()
                .unwrap();
        let initiator_exchange =
            frames_of(initiator.handle(Event::from_frame(responder_exchange).unwrap()))
                .pop()
                .unwrap();
        let mut responder_out =
            frames_of(responder.handle(Event::from_frame(initiator_exchange).unwrap()));
        let ack = responder_out.remove(0);
        assert_eq!(ack.header.msg_type, FrameType::Ack);

        let flushed = frames_of(initiator.handle(Event::from_frame(ack).unwrap()));
        assert_eq!(flushed.len(), 3);
        assert_eq!(initiator.queued(), 0);

        // The responder decrypts them in submission order.
        let mut received = Vec::new();
        for frame in flushed {
            for output in responder.handle(Event::from_frame(frame).unwrap()) {
                if let Output::Deliver(payload) = output {
                    received.push(payload);
                }
            }
        }
        assert_eq!(received, vec![&b"P1"[..], b"P2", b"P3"]);
    }

    #[test]
    fn queue_cap_rejects_overflow() {
        let config = SessionConfig::builder()
            .max_queued_payloads(2)
            .build()
            .unwrap();
        let mut session = Session::new(Role::Initiator, INITIATOR_ID.clone(), &config);

        session.send(Bytes::from_static(b"one")).unwrap();
        session.send(Bytes::from_static(b"two")).unwrap();
        let err = session.send(Bytes::from_static(b"three")).unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::QueueFull { max: 2 })
        ));
        assert_eq!(session.queued(), 2);
    }

    #[test]
    fn out_of_order_event_is_a_protocol_violation() {
        let (_, mut initiator) = pair();

        let envelope = Envelope {
            ciphertext: Bytes::from_static(b"junk"),
            signature: Bytes::from_static(b"junk"),
            iv: Bytes::from(vec![0u8; 16]),
        };
        let outputs = initiator.handle(Event::Data(envelope));
        assert!(outputs.is_empty());
        assert_eq!(
            initiator.state(),
            State::Closed(CloseReason::ProtocolViolation)
        );
    }

    #[test]
    fn ack_to_an_open_responder_is_a_protocol_violation() {
        let (mut responder, mut initiator) = pair();
        run_handshake(&mut responder, &mut initiator);

        responder.handle(Event::Ack);
        assert_eq!(
            responder.state(),
            State::Closed(CloseReason::ProtocolViolation)
        );
    }

    #[test]
    fn closed_is_absorbing() {
        let (mut responder, mut initiator) = pair();
        let cert = frames_of(responder.start()).pop().unwrap();

        initiator.handle(Event::Ack); // out of order
        assert_eq!(
            initiator.state(),
            State::Closed(CloseReason::ProtocolViolation)
        );

        // Later events are ignored and do not change the reason.
        let outputs = initiator.handle(Event::from_frame(cert).unwrap());
        assert!(outputs.is_empty());
        assert_eq!(
            initiator.state(),
            State::Closed(CloseReason::ProtocolViolation)
        );

        let err = initiator.send(Bytes::from_static(b"late")).unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::Closed(CloseReason::ProtocolViolation))
        ));
    }

    #[test]
    fn tampered_envelope_is_dropped_without_closing() {
        let (mut responder, mut initiator) = pair();
        run_handshake(&mut responder, &mut initiator);

        let frame = frames_of(initiator.send(Bytes::from_static(b"good")).unwrap())
            .pop()
            .unwrap();
        let mut envelope = Envelope::decode(frame.payload).unwrap();
        let mut ciphertext = envelope.ciphertext.to_vec();
        ciphertext[0] ^= 0xFF;
        envelope.ciphertext = Bytes::from(ciphertext);

        let outputs = responder.handle(Event::Data(envelope));
        assert!(outputs.is_empty());
        assert_eq!(responder.state(), State::Open);

        // A healthy envelope still goes through afterwards.
        let frame = frames_of(initiator.send(Bytes::from_static(b"still fine")).unwrap())
            .pop()
            .unwrap();
        let outputs = responder.handle(Event::from_frame(frame).unwrap());
        assert!(matches!(
            &outputs[..],
            [Output::Deliver(payload)] if &payload[..] == b"still fine"
        ));
    }

    #[test]
    fn transport_closure_closes_from_any_state() {
        let (mut responder, mut initiator) = pair();

        responder.handle(Event::TransportClosed);
        assert_eq!(
            responder.state(),
            State::Closed(CloseReason::TransportClosed)
        );

        run_handshake(&mut Session::new(
            Role::Responder,
            RESPONDER_ID.clone(),
            &SessionConfig::default(),
        ), &mut initiator);
        initiator.handle(Event::TransportClosed);
        assert_eq!(
            initiator.state(),
            State::Closed(CloseReason::TransportClosed)
        );
        assert!(initiator.session_key().is_none());
    }

    #[test]
    fn forced_close_discards_key_material_and_queue() {
        let (_, mut initiator) = pair();
        initiator.send(Bytes::from_static(b"pending")).unwrap();
        assert_eq!(initiator.queued(), 1);

        initiator.close(CloseReason::Timeout);
        assert_eq!(initiator.state(), State::Closed(CloseReason::Timeout));
        assert_eq!(initiator.queued(), 0);
        assert!(initiator.session_key().is_none());

        // First reason wins.
        initiator.close(CloseReason::ProtocolViolation);
        assert_eq!(initiator.state(), State::Closed(CloseReason::Timeout));
    }
}
