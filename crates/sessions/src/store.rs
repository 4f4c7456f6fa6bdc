use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::{
    error::StoreError,
    record::{RecordSet, SessionRecord},
};

/// JSON file-backed store holding every [`SessionRecord`] as one array.
///
/// Writes replace the whole document through a temp file and rename, under an
/// exclusive lock on a sibling `.lock` file so other processes editing the
/// same store (e.g. the CLI) serialize with us.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sessions.json".into());
        name.push(suffix);
        self.path.with_file_name(name)
    }

    /// Create an empty document if none exists. Never overwrites.
    ///
    /// Returns true when the document was created.
    pub fn ensure_exists(&self) -> Result<bool, StoreError> {
        if self.path.exists() {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| self.write_err(source))?;
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                file.write_all(b"[]").map_err(|source| self.write_err(source))?;
                info!(path = %self.path.display(), "sessions file created");
                Ok(true)
            },
            // Lost a race with another creator; theirs is as good as ours.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(source) => Err(self.write_err(source)),
        }
    }

    /// Load the full record set. A missing document reads as empty.
    pub fn read_all(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "sessions file missing, treating as empty");
                return Ok(Vec::new());
            },
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            },
        };
        serde_json::from_str(&data).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the whole document with `records`.
    pub fn write_all(&self, records: &[SessionRecord]) -> Result<(), StoreError> {
        let mut lock = self.open_lock()?;
        let _guard = lock.write().map_err(|source| self.write_err(source))?;
        self.replace_document(records)
    }

    /// Read, apply `f`, and write back if `f` changed anything, all under the
    /// exclusive file lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut RecordSet) -> R) -> Result<R, StoreError> {
        let mut lock = self.open_lock()?;
        let _guard = lock.write().map_err(|source| self.write_err(source))?;

        let mut set = RecordSet::new(self.read_all()?);
        let out = f(&mut set);
        if set.is_dirty() {
            self.replace_document(set.records())?;
        }
        Ok(out)
    }

    fn open_lock(&self) -> Result<fd_lock::RwLock<File>, StoreError> {
        let lock_path = self.sibling(".lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| self.write_err(source))?;
        Ok(fd_lock::RwLock::new(file))
    }

    fn replace_document(&self, records: &[SessionRecord]) -> Result<(), StoreError> {
        let data = serde_json::to_string(records).map_err(StoreError::Serialize)?;
        let tmp = self.sibling(".tmp");
        let written = fs::write(&tmp, data).and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(source) = written {
            if let Err(e) = fs::remove_file(&tmp) {
                warn!(path = %tmp.display(), error = %e, "failed to clean up temp sessions file");
            }
            return Err(self.write_err(source));
        }
        debug!(path = %self.path.display(), count = records.len(), "sessions file written");
        Ok(())
    }

    fn write_err(&self, source: io::Error) -> StoreError {
        StoreError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions.json"));
        (dir, store)
    }

    #[test]
    fn ensure_exists_creates_empty_array() {
        let (_dir, store) = temp_store();
        assert!(store.ensure_exists().unwrap());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "[]");
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn ensure_exists_never_overwrites() {
        let (_dir, store) = temp_store();
        store
            .write_all(&[SessionRecord::new("s1", "keep me")])
            .unwrap();
        assert!(!store.ensure_exists().unwrap());
        assert_eq!(store.read_all().unwrap().len(), 1);
    }

    #[test]
    fn ensure_exists_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested/deeper/sessions.json"));
        assert!(store.ensure_exists().unwrap());
        assert!(store.path().exists());
    }

    #[test]
    fn missing_document_reads_empty() {
        let (_dir, store) = temp_store();
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn corrupt_document_is_reported() {
        let (_dir, store) = temp_store();
        fs::write(store.path(), r#"{"id":"not an array"}"#).unwrap();
        let err = store.read_all().unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn reads_the_documented_layout() {
        let (_dir, store) = temp_store();
        fs::write(
            store.path(),
            r#"[{"id":"s1","description":"d","ready":false},{"id":"s2","description":"","ready":true}]"#,
        )
        .unwrap();
        let records = store.read_all().unwrap();
        assert_eq!(records, vec![
            SessionRecord::new("s1", "d"),
            SessionRecord {
                id: "s2".into(),
                description: String::new(),
                ready: true,
            },
        ]);
    }

    #[test]
    fn update_skips_write_when_unchanged() {
        let (_dir, store) = temp_store();
        fs::write(store.path(), r#"[ {"id":"s1","description":"d","ready":false} ]"#).unwrap();

        let found = store.update(|set| set.set_ready("ghost", true)).unwrap();
        assert!(!found);
        // Original formatting is untouched.
        assert!(fs::read_to_string(store.path()).unwrap().starts_with("[ {"));
    }

    #[test]
    fn update_does_not_clobber_corrupt_document() {
        let (_dir, store) = temp_store();
        fs::write(store.path(), "garbage").unwrap();
        let err = store
            .update(|set| set.insert_if_absent(SessionRecord::new("s1", "d")))
            .unwrap_err();
        assert!(err.is_corrupt());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "garbage");
    }

    #[test]
    fn no_temp_file_left_behind() {
        let (dir, store) = temp_store();
        store.write_all(&[SessionRecord::new("s1", "d")]).unwrap();
        assert!(!dir.path().join("sessions.json.tmp").exists());
    }
}
