use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde_json::json,
    thiserror::Error,
    wagate_channels::TransportError,
    wagate_sessions::StoreError,
};

/// Failures of [`SessionManager`](crate::manager::SessionManager) operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by the HTTP API. Every variant renders as a JSON body with
/// `status: false` plus either a `message` or the raw transport `response`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("{0}")]
    InvalidBody(String),

    #[error("The sender: {0} is not found!")]
    UnknownSender(String),

    #[error("The number is not registered")]
    UnregisteredRecipient,

    #[error("registration lookup failed: {0}")]
    TransportQuery(TransportError),

    #[error("send failed: {0}")]
    TransportSend(TransportError),

    #[error("no pending QR challenge for session {0}")]
    NoChallenge(String),

    #[error("failed to create session: {0}")]
    Create(#[source] ManagerError),

    #[error("failed to read sessions: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::MissingField(_)
            | Self::InvalidBody(_)
            | Self::UnknownSender(_)
            | Self::UnregisteredRecipient => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "status": false, "message": self.to_string() }),
            ),
            Self::TransportQuery(err) | Self::TransportSend(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "status": false, "response": err.payload() }),
            ),
            Self::NoChallenge(_) => (
                StatusCode::NOT_FOUND,
                json!({ "status": false, "message": self.to_string() }),
            ),
            Self::Create(_) | Self::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "status": false, "message": self.to_string() }),
            ),
        };
        (status, Json(body)).into_response()
    }
}
