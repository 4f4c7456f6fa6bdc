//! Gateway: session lifecycle manager and the HTTP surface in front of it.
//!
//! Lifecycle:
//! 1. Load config, spawn the session store writer
//! 2. Build the transport factory and the session manager
//! 3. Start the HTTP server
//! 4. Restore stored sessions on `GET /` (or at boot when configured)
//!
//! Sessions progress through the state machine in `lifecycle.rs`; every
//! transition's store effect is applied before the transition is published.

pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod qr;
pub mod server;
pub mod state;

pub use {
    error::{ApiError, ManagerError},
    lifecycle::SessionState,
    manager::{LiveSession, RestoreReport, SessionManager, SessionSnapshot, SessionUpdate},
    server::{build_gateway_app, start_gateway},
    state::GatewayState,
};
