//! Core types shared by the target device, the agent client and the store.

pub mod clock;
pub mod consent;
pub mod identity;
pub mod message;
pub mod records;
pub mod validate;

pub use clock::{Clock, FixedClock, SystemClock};
pub use consent::{AlwaysAccept, Consent, ConsentPolicy};
pub use identity::DeviceIdentity;
pub use message::{decode, InboundMessage, OutboundMessage, ProtocolError, Reply};
pub use records::{EventKind, LogEntry, ScanMetadata, Settings, LOG_CAPACITY};
pub use validate::{validate, verdict, ValidationError, VALID_MESSAGE};

/// Default TCP port the target listens on.
pub const DEFAULT_PORT: u16 = 8000;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
