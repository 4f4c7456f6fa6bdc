use std::{sync::Arc, time::Instant};

use crate::manager::SessionManager;

/// Shared gateway runtime state, wrapped in Arc for use across handlers.
pub struct GatewayState {
    /// Live sessions and their store.
    pub manager: Arc<SessionManager>,
    /// Country code used to normalize recipient numbers.
    pub country_code: String,
    /// Server version string.
    pub version: String,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(manager: Arc<SessionManager>, country_code: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            country_code: country_code.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
        })
    }

    /// Kick off restoration in the background; the caller does not wait.
    pub fn spawn_restore(&self) {
        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            // Outcome and failures are logged by the manager.
            let _ = manager.restore_all().await;
        });
    }
}
