//! Transport contract for messaging-account sessions.
//!
//! A transport client is one connection to the messaging network for one
//! account. It reports lifecycle events (QR challenge, authentication,
//! readiness, disconnection) through an [`EventSink`] and exposes the
//! registration lookup and send operations the gateway needs.

pub mod address;
pub mod error;
pub mod loopback;
pub mod transport;

pub use {
    error::TransportError,
    loopback::{LoopbackFactory, LoopbackHandle, PairMode, SentMessage},
    transport::{EventSink, TransportClient, TransportEvent, TransportFactory},
};
