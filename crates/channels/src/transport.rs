use std::sync::Arc;

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::error::TransportError;

/// Lifecycle events a transport reports for its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Pairing challenge to show to the account owner.
    Qr(String),
    Authenticated,
    /// Stored credentials were refused. The transport retries on its own.
    AuthFailure(String),
    Ready,
    /// Connection lost for good; carries the transport's reason.
    Disconnected(String),
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Qr(_) => "qr",
            Self::Authenticated => "authenticated",
            Self::AuthFailure(_) => "auth_failure",
            Self::Ready => "ready",
            Self::Disconnected(_) => "disconnected",
        }
    }
}

/// Where a transport pushes its events. Events from one sink are delivered
/// to the gateway in the order they were emitted.
#[derive(Debug, Clone)]
pub struct EventSink {
    session_id: String,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    pub fn new(session_id: impl Into<String>, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            session_id: session_id.into(),
            tx,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queue an event. Returns false once the session stopped listening.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// One connection to the messaging network for one account.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Begin connecting and authenticating. Returns once the attempt is
    /// underway; progress is reported through the [`EventSink`].
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Whether `address` is a reachable account on the network.
    async fn is_registered_user(&self, address: &str) -> Result<bool, TransportError>;

    /// Send a text message, returning the network's receipt.
    async fn send_message(
        &self,
        address: &str,
        text: &str,
    ) -> Result<serde_json::Value, TransportError>;

    /// Release transport resources. Safe to call before a new `initialize`.
    async fn destroy(&self) -> Result<(), TransportError>;
}

/// Builds one [`TransportClient`] per session.
pub trait TransportFactory: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn create(&self, session_id: &str, events: EventSink) -> Arc<dyn TransportClient>;
}
