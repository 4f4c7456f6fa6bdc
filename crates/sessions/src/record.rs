use serde::{Deserialize, Serialize};

/// A persisted session entry. `id` is the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Last-known readiness. A liveness hint only; it can be briefly stale.
    #[serde(default)]
    pub ready: bool,
}

impl SessionRecord {
    /// A freshly created record, not yet ready.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            ready: false,
        }
    }
}

/// The full record document, in file order.
///
/// Mutators mark the set dirty only when they actually change it, so callers
/// can skip rewriting an unchanged document.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: Vec<SessionRecord>,
    dirty: bool,
}

impl RecordSet {
    pub fn new(records: Vec<SessionRecord>) -> Self {
        Self {
            records,
            dirty: false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&SessionRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Append `record` unless one with the same id exists. Returns true when
    /// the record was added.
    pub fn insert_if_absent(&mut self, record: SessionRecord) -> bool {
        if self.get(&record.id).is_some() {
            return false;
        }
        self.records.push(record);
        self.dirty = true;
        true
    }

    /// Update the `ready` flag of the matching record. Returns false when no
    /// record has this id.
    pub fn set_ready(&mut self, id: &str, ready: bool) -> bool {
        let Some(record) = self.records.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        if record.ready != ready {
            record.ready = ready;
            self.dirty = true;
        }
        true
    }

    /// Remove every record with this id. Returns the first one removed.
    pub fn remove(&mut self, id: &str) -> Option<SessionRecord> {
        let pos = self.records.iter().position(|r| r.id == id)?;
        let removed = self.records.remove(pos);
        // Hand-edited documents may carry duplicates; drop them too.
        self.records.retain(|r| r.id != id);
        self.dirty = true;
        Some(removed)
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }
}
