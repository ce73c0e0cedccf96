//! Local session store: a small durable key-value store owned by one
//! participant's browser/profile.
//!
//! The contract is deliberately synchronous. Session transitions persist before
//! returning, and nothing else can interleave with a write.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Errors surfaced by local session store adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LocalStoreError {
    #[error("local store i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("local store unavailable: {0}")]
    Unavailable(String),
}

/// `get`/`set`/`remove` over string keys and values.
pub trait LocalSessionStore: Send + Sync {
    /// Read a value, `None` if the key was never set or has been removed.
    ///
    /// # Errors
    ///
    /// Returns `LocalStoreError` if the backing store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError>;

    /// Durably write a value.
    ///
    /// # Errors
    ///
    /// Returns `LocalStoreError` if the value cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError>;

    /// Remove a key. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `LocalStoreError` if the backing store cannot be updated.
    fn remove(&self, key: &str) -> Result<(), LocalStoreError>;
}

//
// ─── IN-MEMORY ────────────────────────────────────────────────────────────────
//

/// Process-local store. Clones share the same map, which models a page reload
/// handing the same storage to a fresh engine instance.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    ///
    /// # Errors
    ///
    /// Returns `LocalStoreError::Unavailable` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, LocalStoreError> {
        Ok(self.lock()?.len())
    }

    /// # Errors
    ///
    /// Returns `LocalStoreError::Unavailable` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, LocalStoreError> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, LocalStoreError> {
        self.entries
            .lock()
            .map_err(|e| LocalStoreError::Unavailable(e.to_string()))
    }
}

impl LocalSessionStore for InMemorySessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        self.lock()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

//
// ─── FILE-BACKED ──────────────────────────────────────────────────────────────
//

/// One file per key inside a directory.
///
/// Writes go to a temporary sibling and are renamed into place, so a crash
/// mid-write leaves either the old value or the new one.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Open (and create if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns `LocalStoreError::Io` if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, LocalStoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }
}

/// Map an arbitrary key to a portable file name.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

impl LocalSessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("survey-lss-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn in_memory_clones_share_entries() {
        let store = InMemorySessionStore::new();
        let reloaded = store.clone();
        store.set("k", "v").unwrap();
        assert_eq!(reloaded.get("k").unwrap().as_deref(), Some("v"));
        reloaded.remove("k").unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = scratch_dir();
        let store = FileSessionStore::open(&dir).unwrap();
        store.set("survey:s1/u1", "{\"cursor\":2}").unwrap();

        let reopened = FileSessionStore::open(&dir).unwrap();
        assert_eq!(
            reopened.get("survey:s1/u1").unwrap().as_deref(),
            Some("{\"cursor\":2}")
        );

        reopened.remove("survey:s1/u1").unwrap();
        assert_eq!(store.get("survey:s1/u1").unwrap(), None);
        reopened.remove("survey:s1/u1").unwrap();

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn keys_are_encoded_to_safe_file_names() {
        assert_eq!(encode_key("survey:s1/u-1"), "survey%3As1%2Fu-1");
    }
}
