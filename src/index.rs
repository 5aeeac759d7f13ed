//! Persistent content hash → stored name index.
//!
//! The whole map lives in memory and is written back to a single JSON document
//! on demand. There is no append log: every persist rewrites the file, and the
//! last writer wins.

use crate::content_hash::ContentHash;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

pub struct HashIndex {
    entries: DashMap<ContentHash, String>,
    path: PathBuf,
    /// Serializes snapshot + write so an older snapshot never lands last.
    persist_lock: Mutex<()>,
}

impl HashIndex {
    /// Load the index document at `path`.
    ///
    /// A missing document yields an empty index. A malformed one is logged and
    /// also yields an empty index; it is overwritten on the next persist.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = DashMap::new();

        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<ContentHash, String>>(&raw) {
                Ok(map) => {
                    for (hash, name) in map {
                        entries.insert(hash, name);
                    }
                }
                Err(err) => {
                    log::warn!(
                        "Hash index at {:?} is malformed, starting empty: {}",
                        path,
                        err
                    );
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::info!("No hash index at {:?}, starting empty", path);
            }
            Err(err) => {
                log::warn!("Could not read hash index at {:?}, starting empty: {}", path, err);
            }
        }

        log::info!("Hash index loaded with {} entries", entries.len());

        Self {
            entries,
            path,
            persist_lock: Mutex::new(()),
        }
    }

    pub fn get(&self, hash: &ContentHash) -> Option<String> {
        self.entries.get(hash).map(|name| name.value().clone())
    }

    /// Record `name` for `hash`, replacing any previous mapping.
    pub fn insert(&self, hash: ContentHash, name: String) -> Option<String> {
        self.entries.insert(hash, name)
    }

    /// Drop the entry for `hash` only if it still points at `name`.
    pub fn remove_if_name(&self, hash: &ContentHash, name: &str) -> bool {
        self.entries.remove_if(hash, |_, v| v.as_str() == name).is_some()
    }

    /// Remove every entry whose value is `name`. Returns how many were dropped.
    pub fn remove_by_name(&self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, v| v.as_str() != name);
        before.saturating_sub(self.entries.len())
    }

    /// Keep only entries whose stored name is in `present`.
    pub fn retain_present(&self, present: &HashSet<String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, v| present.contains(v.as_str()));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ordered copy of the current mapping.
    pub fn snapshot(&self) -> BTreeMap<ContentHash, String> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Rewrite the whole document.
    ///
    /// Writes to a sibling temp file and renames it over the old document.
    /// This does blocking I/O; call it from `web::block` in async code.
    pub fn persist(&self) -> io::Result<()> {
        let _guard = self
            .persist_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let json = serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Err(err) = fs::write(&tmp, json).and_then(|_| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }

        log::debug!("Persisted {} index entries to {:?}", self.len(), self.path);
        Ok(())
    }
}
