//! In-process transport.
//!
//! Stands in for a real network connection: it pairs itself (or waits for
//! events injected through its [`LoopbackHandle`]), answers registration
//! lookups from a local address list and records every message it is asked
//! to send.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    serde::Serialize,
    tokio::task::AbortHandle,
    tracing::{debug, info},
};

use crate::{
    error::TransportError,
    transport::{EventSink, TransportClient, TransportEvent, TransportFactory},
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// How loopback clients get through pairing.
#[derive(Debug, Clone, Copy)]
pub enum PairMode {
    /// Emit qr → authenticated → ready on their own, `delay` apart.
    Auto { delay: Duration },
    /// Emit nothing; events are injected through [`LoopbackHandle::emit`].
    Manual,
}

/// A message accepted by a loopback client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentMessage {
    pub id: String,
    pub to: String,
    pub body: String,
    pub timestamp: u64,
}

/// Shared state of one loopback client, visible to whoever built it.
pub struct LoopbackHandle {
    events: EventSink,
    connected: AtomicBool,
    destroyed: AtomicBool,
    registers_everyone: AtomicBool,
    registered: Mutex<HashSet<String>>,
    send_failure: Mutex<Option<serde_json::Value>>,
    sent: Mutex<Vec<SentMessage>>,
    lookups: AtomicUsize,
    initializations: AtomicUsize,
    pairing: Mutex<Option<AbortHandle>>,
}

impl LoopbackHandle {
    fn new(events: EventSink, registers_everyone: bool) -> Self {
        Self {
            events,
            connected: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            registers_everyone: AtomicBool::new(registers_everyone),
            registered: Mutex::new(HashSet::new()),
            send_failure: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            lookups: AtomicUsize::new(0),
            initializations: AtomicUsize::new(0),
            pairing: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        self.events.session_id()
    }

    /// Push a lifecycle event as if the network had produced it.
    pub fn emit(&self, event: TransportEvent) -> bool {
        match &event {
            TransportEvent::Ready => self.connected.store(true, Ordering::SeqCst),
            TransportEvent::Disconnected(_) => self.connected.store(false, Ordering::SeqCst),
            _ => {},
        }
        self.events.emit(event)
    }

    /// Mark `address` as a registered user.
    pub fn register(&self, address: &str) {
        lock(&self.registered).insert(address.to_string());
    }

    /// When true every address counts as registered.
    pub fn set_registers_everyone(&self, everyone: bool) {
        self.registers_everyone.store(everyone, Ordering::SeqCst);
    }

    /// Make subsequent sends fail with `payload` (or succeed again with `None`).
    pub fn fail_sends(&self, payload: Option<serde_json::Value>) {
        *lock(&self.send_failure) = payload;
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn initialize_count(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_usable(&self) -> Result<(), TransportError> {
        if self.is_destroyed() {
            return Err(TransportError::Closed);
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }
}

struct LoopbackClient {
    handle: Arc<LoopbackHandle>,
    mode: PairMode,
    fail_initialize: bool,
}

#[async_trait]
impl TransportClient for LoopbackClient {
    async fn initialize(&self) -> Result<(), TransportError> {
        let handle = &self.handle;
        handle.initializations.fetch_add(1, Ordering::SeqCst);
        if self.fail_initialize {
            return Err(TransportError::Initialize(format!(
                "loopback session {} refused to start",
                handle.session_id()
            )));
        }
        handle.destroyed.store(false, Ordering::SeqCst);

        let PairMode::Auto { delay } = self.mode else {
            return Ok(());
        };

        let pairing = Arc::clone(handle);
        let task = tokio::spawn(async move {
            let challenge = format!("loopback:{}:{}", pairing.session_id(), uuid::Uuid::new_v4());
            for event in [
                TransportEvent::Qr(challenge),
                TransportEvent::Authenticated,
                TransportEvent::Ready,
            ] {
                tokio::time::sleep(delay).await;
                if !pairing.emit(event) {
                    return;
                }
            }
            debug!(session = %pairing.session_id(), "loopback pairing finished");
        });
        if let Some(previous) = lock(&handle.pairing).replace(task.abort_handle()) {
            previous.abort();
        }
        Ok(())
    }

    async fn is_registered_user(&self, address: &str) -> Result<bool, TransportError> {
        let handle = &self.handle;
        handle.lookups.fetch_add(1, Ordering::SeqCst);
        handle.ensure_usable()?;
        Ok(handle.registers_everyone.load(Ordering::SeqCst)
            || lock(&handle.registered).contains(address))
    }

    async fn send_message(
        &self,
        address: &str,
        text: &str,
    ) -> Result<serde_json::Value, TransportError> {
        let handle = &self.handle;
        handle.ensure_usable()?;
        if let Some(payload) = lock(&handle.send_failure).clone() {
            return Err(TransportError::Rejected { payload });
        }

        let message = SentMessage {
            id: uuid::Uuid::new_v4().to_string(),
            to: address.to_string(),
            body: text.to_string(),
            timestamp: now_ms(),
        };
        info!(session = %handle.session_id(), to = %address, "loopback message sent");
        lock(&handle.sent).push(message.clone());
        serde_json::to_value(message).map_err(|e| TransportError::Rejected {
            payload: serde_json::json!({ "message": e.to_string() }),
        })
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        let handle = &self.handle;
        if let Some(pairing) = lock(&handle.pairing).take() {
            pairing.abort();
        }
        handle.connected.store(false, Ordering::SeqCst);
        handle.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Builds loopback clients and keeps a handle to the latest one per session.
pub struct LoopbackFactory {
    mode: PairMode,
    handles: Mutex<HashMap<String, Arc<LoopbackHandle>>>,
    failing: Mutex<HashSet<String>>,
    created: AtomicUsize,
}

impl LoopbackFactory {
    pub fn new(mode: PairMode) -> Self {
        Self {
            mode,
            handles: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            created: AtomicUsize::new(0),
        }
    }

    pub fn auto(delay: Duration) -> Self {
        Self::new(PairMode::Auto { delay })
    }

    pub fn manual() -> Self {
        Self::new(PairMode::Manual)
    }

    /// Handle of the most recent client built for `session_id`.
    pub fn handle(&self, session_id: &str) -> Option<Arc<LoopbackHandle>> {
        lock(&self.handles).get(session_id).cloned()
    }

    /// Total number of clients built so far.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Clients built for `session_id` from now on fail to initialize.
    pub fn fail_initialize(&self, session_id: &str) {
        lock(&self.failing).insert(session_id.to_string());
    }
}

impl TransportFactory for LoopbackFactory {
    fn name(&self) -> &str {
        "loopback"
    }

    fn create(&self, session_id: &str, events: EventSink) -> Arc<dyn TransportClient> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let registers_everyone = matches!(self.mode, PairMode::Auto { .. });
        let handle = Arc::new(LoopbackHandle::new(events, registers_everyone));
        lock(&self.handles).insert(session_id.to_string(), Arc::clone(&handle));

        Arc::new(LoopbackClient {
            handle,
            mode: self.mode,
            fail_initialize: lock(&self.failing).contains(session_id),
        })
    }
}
