pub mod crypto;
pub mod error;
pub mod frame;
pub mod registry;
pub mod session;

// Re-export key types at crate root for convenience.
pub use crypto::identity::{Certificate, Identity, PeerKey};
pub use crypto::SessionKey;
pub use error::{CloseReason, Error, Result};
pub use frame::{CertificateMsg, Envelope, ExchangeMsg, Frame, FrameType};
pub use registry::{MembershipRegistry, OpenRegistry, StaticRegistry};
pub use session::channel::SecureChannel;
pub use session::state::{Event, Output, Role, Session, State};
pub use session::SessionConfig;
