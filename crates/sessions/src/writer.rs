//! Serialized access to the [`SessionStore`].
//!
//! One task owns the store and drains a queue of commands. Each command runs
//! its full read-modify-write cycle before the next one starts, so two
//! sessions becoming ready (or disconnecting) at the same moment can no longer
//! overwrite each other's changes.

use std::sync::Arc;

use {
    tokio::sync::{mpsc, oneshot},
    tracing::{debug, info, warn},
};

use crate::{error::StoreError, record::SessionRecord, store::SessionStore};

const QUEUE_DEPTH: usize = 256;

enum StoreCommand {
    ReadAll {
        reply: oneshot::Sender<Result<Vec<SessionRecord>, StoreError>>,
    },
    InsertIfAbsent {
        record: SessionRecord,
        reply: oneshot::Sender<Result<bool, StoreError>>,
    },
    SetReady {
        id: String,
        ready: bool,
        reply: oneshot::Sender<Result<bool, StoreError>>,
    },
    Remove {
        id: String,
        reply: oneshot::Sender<Result<Option<SessionRecord>, StoreError>>,
    },
}

/// The task that owns the store.
pub struct StoreWriter {
    store: Arc<SessionStore>,
    rx: mpsc::Receiver<StoreCommand>,
}

impl StoreWriter {
    /// Make sure the document exists, then spawn the writer task on the
    /// current runtime. The task ends once every handle is dropped.
    pub fn spawn(store: SessionStore) -> StoreHandle {
        if let Err(e) = store.ensure_exists() {
            // Reads treat a missing document as empty, so keep going.
            warn!(error = %e, "failed to create sessions file");
        }

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let writer = Self {
            store: Arc::new(store),
            rx,
        };
        tokio::spawn(writer.run());
        StoreHandle { tx }
    }

    async fn run(mut self) {
        debug!(path = %self.store.path().display(), "session store writer started");
        while let Some(cmd) = self.rx.recv().await {
            self.handle(cmd).await;
        }
        debug!("session store writer stopped");
    }

    async fn handle(&self, cmd: StoreCommand) {
        match cmd {
            StoreCommand::ReadAll { reply } => {
                let out = self.blocking(|store| store.read_all()).await;
                let _ = reply.send(out);
            },
            StoreCommand::InsertIfAbsent { record, reply } => {
                let id = record.id.clone();
                let out = self
                    .blocking(move |store| store.update(|set| set.insert_if_absent(record)))
                    .await;
                if let Ok(true) = out {
                    info!(session = %id, "session record added");
                }
                let _ = reply.send(out);
            },
            StoreCommand::SetReady { id, ready, reply } => {
                let key = id.clone();
                let out = self
                    .blocking(move |store| store.update(|set| set.set_ready(&key, ready)))
                    .await;
                if let Ok(false) = out {
                    debug!(session = %id, "no record to mark ready");
                }
                let _ = reply.send(out);
            },
            StoreCommand::Remove { id, reply } => {
                let key = id.clone();
                let out = self
                    .blocking(move |store| store.update(|set| set.remove(&key)))
                    .await;
                if let Ok(Some(_)) = out {
                    info!(session = %id, "session record removed");
                }
                let _ = reply.send(out);
            },
        }
    }

    async fn blocking<R: Send + 'static>(
        &self,
        f: impl FnOnce(&SessionStore) -> Result<R, StoreError> + Send + 'static,
    ) -> Result<R, StoreError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }
}

/// Cheap, cloneable handle for queueing store commands.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<R, StoreError>>) -> StoreCommand,
    ) -> Result<R, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        rx.await.map_err(|_| StoreError::WriterClosed)?
    }

    /// Load every record, ordered after all previously queued mutations.
    pub async fn read_all(&self) -> Result<Vec<SessionRecord>, StoreError> {
        self.request(|reply| StoreCommand::ReadAll { reply }).await
    }

    /// Add `record` unless its id is already present. Returns true when added.
    pub async fn insert_if_absent(&self, record: SessionRecord) -> Result<bool, StoreError> {
        self.request(|reply| StoreCommand::InsertIfAbsent { record, reply })
            .await
    }

    /// Set the `ready` flag. Returns false when no record matches.
    pub async fn set_ready(&self, id: &str, ready: bool) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.request(|reply| StoreCommand::SetReady { id, ready, reply })
            .await
    }

    /// Delete the record for `id`, returning it if it existed.
    pub async fn remove(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let id = id.to_string();
        self.request(|reply| StoreCommand::Remove { id, reply }).await
    }
}
