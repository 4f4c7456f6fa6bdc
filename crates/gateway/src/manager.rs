//! Session lifecycle manager: registry of live sessions, transport wiring and
//! store reconciliation.
//!
//! Each live session owns an ordered event queue drained by its own task, so a
//! slow session never delays or reorders another one's events. Store updates
//! are queued on the shared [`StoreHandle`] and therefore never race.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use {
    futures::future::join_all,
    serde::Serialize,
    tokio::{
        sync::{RwLock, broadcast, mpsc, watch},
        task::AbortHandle,
    },
    tracing::{debug, error, info, warn},
    wagate_channels::{EventSink, TransportClient, TransportEvent, TransportFactory},
    wagate_sessions::{SessionRecord, StoreError, StoreHandle},
};

use crate::{
    error::ManagerError,
    lifecycle::{self, Effect, SessionState},
    qr,
};

const UPDATE_CAPACITY: usize = 256;

/// A state change published after its store effect has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUpdate {
    pub id: String,
    pub state: SessionState,
}

/// A session whose transport client is initializing or connected.
pub struct LiveSession {
    pub id: String,
    pub description: String,
    client: Arc<dyn TransportClient>,
    state: watch::Sender<SessionState>,
    challenge: Mutex<Option<String>>,
    pump: Mutex<Option<AbortHandle>>,
}

impl LiveSession {
    pub fn client(&self) -> Arc<dyn TransportClient> {
        Arc::clone(&self.client)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch this session's state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Latest QR challenge, until the session authenticates.
    pub fn challenge(&self) -> Option<String> {
        self.challenge
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_challenge(&self, challenge: Option<String>) {
        *self
            .challenge
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = challenge;
    }

    fn stop_pump(&self) {
        if let Some(pump) = self
            .pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            pump.abort();
        }
    }
}

/// Point-in-time view of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub description: String,
    pub state: SessionState,
}

/// Outcome of [`SessionManager::restore_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub restored: usize,
    pub failed: usize,
}

/// Owns every live session and keeps the store in step with their lifecycle.
pub struct SessionManager {
    factory: Arc<dyn TransportFactory>,
    store: StoreHandle,
    sessions: RwLock<HashMap<String, Arc<LiveSession>>>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn TransportFactory>, store: StoreHandle) -> Arc<Self> {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Arc::new(Self {
            factory,
            store,
            sessions: RwLock::new(HashMap::new()),
            updates,
        })
    }

    /// Receive every accepted state change across all sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    fn publish(&self, session: &LiveSession, state: SessionState) {
        session.state.send_replace(state);
        // No subscribers is fine.
        let _ = self.updates.send(SessionUpdate {
            id: session.id.clone(),
            state,
        });
    }

    /// Create a session, or return the live one already registered for `id`.
    ///
    /// The store gains a `ready=false` record unless one exists; store
    /// failures are logged and creation continues. If the transport fails to
    /// initialize, the session is dropped from the registry and the error is
    /// returned; the record stays so the next restoration retries.
    pub async fn create_session(
        self: &Arc<Self>,
        id: &str,
        description: &str,
    ) -> Result<Arc<LiveSession>, ManagerError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            if let Some(existing) = sessions.get(id)
                && !existing.state().is_terminal()
            {
                debug!(session = %id, state = %existing.state(), "session already live");
                return Ok(Arc::clone(existing));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let client = self.factory.create(id, EventSink::new(id, tx));
            let (state, _) = watch::channel(SessionState::Created);
            let session = Arc::new(LiveSession {
                id: id.to_string(),
                description: description.to_string(),
                client,
                state,
                challenge: Mutex::new(None),
                pump: Mutex::new(None),
            });

            let pump = tokio::spawn(Arc::clone(self).pump(Arc::clone(&session), rx));
            *session
                .pump
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(pump.abort_handle());

            sessions.insert(id.to_string(), Arc::clone(&session));
            session
        };
        info!(session = %id, transport = %self.factory.name(), "creating session");
        self.publish(&session, SessionState::Created);

        if let Err(e) = self
            .store
            .insert_if_absent(SessionRecord::new(id, description))
            .await
        {
            warn!(session = %id, error = %e, "failed to persist session record");
        }

        match lifecycle::start(session.state()) {
            Ok(next) => self.publish(&session, next),
            Err(e) => warn!(session = %id, error = %e, "unexpected state before initialize"),
        }

        if let Err(e) = session.client.initialize().await {
            error!(session = %id, error = %e, "transport initialization failed");
            self.deregister(&session).await;
            session.stop_pump();
            return Err(e.into());
        }
        Ok(session)
    }

    /// Recreate every session recorded in the store, all concurrently.
    ///
    /// A corrupt store aborts the whole restoration.
    pub async fn restore_all(self: &Arc<Self>) -> Result<RestoreReport, StoreError> {
        let records = self.stored_records().await.inspect_err(|e| {
            error!(error = %e, "cannot restore sessions");
        })?;
        info!(count = records.len(), "restoring sessions");

        let results = join_all(
            records
                .iter()
                .map(|r| self.create_session(&r.id, &r.description)),
        )
        .await;

        let mut report = RestoreReport::default();
        for (record, result) in records.iter().zip(results) {
            match result {
                Ok(_) => report.restored += 1,
                Err(e) => {
                    warn!(session = %record.id, error = %e, "failed to restore session");
                    report.failed += 1;
                },
            }
        }
        info!(
            restored = report.restored,
            failed = report.failed,
            "session restoration finished"
        );
        Ok(report)
    }

    /// Every stored record. A document that cannot be read is logged and
    /// treated as empty; only a corrupt one is an error.
    pub async fn stored_records(&self) -> Result<Vec<SessionRecord>, StoreError> {
        match self.store.read_all().await {
            Err(e @ StoreError::Read { .. }) => {
                warn!(error = %e, "session store unreadable, treating as empty");
                Ok(Vec::new())
            },
            other => other,
        }
    }

    /// Live session registered under `id`.
    pub async fn lookup(&self, id: &str) -> Option<Arc<LiveSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Snapshot of every live session, ordered by id.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let mut list: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .map(|s| SessionSnapshot {
                id: s.id.clone(),
                description: s.description.clone(),
                state: s.state(),
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Destroy every client without touching the store, so the sessions come
    /// back on the next restoration.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.stop_pump();
            if let Err(e) = session.client.destroy().await {
                warn!(session = %session.id, error = %e, "failed to destroy transport");
            }
        }
        info!("all sessions shut down");
    }

    /// Remove `session` from the registry unless a newer instance replaced it.
    async fn deregister(&self, session: &Arc<LiveSession>) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(&session.id)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(&session.id);
        }
    }

    /// Drain one session's events in order until it disconnects.
    async fn pump(
        self: Arc<Self>,
        session: Arc<LiveSession>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let name = event.name();
            let (next, effect) = match lifecycle::apply(session.state(), event) {
                Ok(step) => step,
                Err(e) => {
                    warn!(session = %session.id, error = %e, "ignoring transport event");
                    continue;
                },
            };
            debug!(session = %session.id, event = name, state = %next, "transport event");

            match effect {
                Effect::None => {},
                Effect::ShowChallenge(challenge) => self.show_challenge(&session, challenge),
                Effect::AwaitRetry(reason) => {
                    warn!(session = %session.id, %reason, "auth failure, transport is restarting");
                },
                Effect::MarkReady => {
                    session.set_challenge(None);
                    self.mark_ready(&session.id).await;
                },
                Effect::Teardown(reason) => {
                    self.teardown(&session, &reason).await;
                    self.publish(&session, next);
                    break;
                },
            }

            if next == SessionState::Authenticated {
                session.set_challenge(None);
                info!(session = %session.id, "session authenticated");
            }
            self.publish(&session, next);
        }
        debug!(session = %session.id, "session event loop finished");
    }

    fn show_challenge(&self, session: &LiveSession, challenge: String) {
        info!(session = %session.id, qr = %challenge, "QR received");
        match qr::render_terminal(&challenge) {
            Ok(code) => info!(session = %session.id, "scan QR code:\n{code}"),
            Err(e) => warn!(session = %session.id, error = %e, "failed to render QR code"),
        }
        session.set_challenge(Some(challenge));
    }

    async fn mark_ready(&self, id: &str) {
        match self.store.set_ready(id, true).await {
            Ok(true) => info!(session = %id, "session is ready"),
            Ok(false) => info!(session = %id, "session is ready (no stored record)"),
            Err(e) => warn!(session = %id, error = %e, "failed to persist ready flag"),
        }
    }

    async fn teardown(&self, session: &Arc<LiveSession>, reason: &str) {
        info!(session = %session.id, %reason, "session disconnected");
        if let Err(e) = self.store.remove(&session.id).await {
            warn!(session = %session.id, error = %e, "failed to remove session record");
        }
        if let Err(e) = session.client.destroy().await {
            warn!(session = %session.id, error = %e, "failed to destroy transport");
        }
        self.deregister(session).await;
    }
}
