//! Per-session lifecycle state machine.
//!
//! ```text
//! Created ─start─▶ Initializing ─authenticated─▶ Authenticated ─ready─▶ Ready
//!                      ▲   │ qr                       │
//!                      └───┴──────── auth_failure ────┘
//!   any non-terminal state ─disconnected─▶ Disconnected (terminal)
//! ```

use {serde::Serialize, wagate_channels::TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Initializing,
    Authenticated,
    Ready,
    Disconnected,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        self == Self::Disconnected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effect the manager runs for an accepted transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Surface a pairing challenge. Never persisted.
    ShowChallenge(String),
    /// The transport rejected its credentials and is retrying by itself.
    AwaitRetry(String),
    /// Flip the stored `ready` flag to true.
    MarkReady,
    /// Delete the stored record and tear the client down.
    Teardown(String),
}

/// An event that is not allowed in the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub state: SessionState,
    pub event: &'static str,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is not valid while {}", self.event, self.state)
    }
}

/// `Created → Initializing`, run right before the transport is initialized.
pub fn start(state: SessionState) -> Result<SessionState, InvalidTransition> {
    match state {
        SessionState::Created => Ok(SessionState::Initializing),
        state => Err(InvalidTransition {
            state,
            event: "start",
        }),
    }
}

/// Apply a transport event to `state`.
pub fn apply(
    state: SessionState,
    event: TransportEvent,
) -> Result<(SessionState, Effect), InvalidTransition> {
    use SessionState::*;

    let name = event.name();
    match (state, event) {
        (Initializing, TransportEvent::Qr(qr)) => Ok((Initializing, Effect::ShowChallenge(qr))),
        (Initializing, TransportEvent::Authenticated) => Ok((Authenticated, Effect::None)),
        (Initializing | Authenticated, TransportEvent::AuthFailure(reason)) => {
            Ok((Initializing, Effect::AwaitRetry(reason)))
        },
        (Authenticated, TransportEvent::Ready) => Ok((Ready, Effect::MarkReady)),
        (Created | Initializing | Authenticated | Ready, TransportEvent::Disconnected(reason)) => {
            Ok((Disconnected, Effect::Teardown(reason)))
        },
        (state, _) => Err(InvalidTransition { state, event: name }),
    }
}
