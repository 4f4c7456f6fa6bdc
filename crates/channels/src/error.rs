use thiserror::Error;

/// Failures reported by a transport client.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("transport initialization failed: {0}")]
    Initialize(String),

    #[error("transport is not connected")]
    NotConnected,

    /// The network refused the request; `payload` is its raw answer.
    #[error("transport rejected the request: {payload}")]
    Rejected { payload: serde_json::Value },

    #[error("transport has been destroyed")]
    Closed,
}

impl TransportError {
    /// JSON body for surfacing this error to API callers unredacted.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Rejected { payload } => payload.clone(),
            other => serde_json::json!({ "message": other.to_string() }),
        }
    }
}
