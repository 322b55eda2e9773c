//! Chat platform plumbing: inbound event validation, the transport runner,
//! and reply delivery.
//!
//! The platform itself sits behind [`socket::ChannelTransport`] and
//! [`delivery::ReplySink`]; no real websocket protocol lives here.

pub mod delivery;
pub mod events;
pub mod socket;

pub use delivery::{deliver, DeliveryError, DeliveryOutcome, LoggingReplySink, ReplySink};
pub use events::{EventEnvelope, EventError, IngressFilter, RawMessageEvent};
pub use socket::{
    ChannelRunner, ChannelTransport, MessageHandler, NoopTransport, ReconnectPolicy,
    TransportError,
};
