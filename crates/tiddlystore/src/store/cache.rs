//! # Durable Cache
//!
//! An opportunistic mirror of the modified tier, so pending edits survive a
//! restart. Nothing depends on it succeeding: every implementation swallows
//! its own failures (logging them), and [`NoCache`] does nothing at all.
//!
//! Entries are keyed by `bag/title`. A tiddler without a bag cannot be keyed
//! and is never mirrored.
//!
//! | Implementation   | Backing                                  |
//! |------------------|------------------------------------------|
//! | [`NoCache`]      | none                                     |
//! | [`MemoryCache`]  | in-process map, for tests                |
//! | [`FileCache`]    | `cache.json` in a directory, atomic writes |

use indexmap::IndexMap;
use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use super::local::escape_key;
use crate::model::Tiddler;

const CACHE_FILE: &str = "cache.json";

pub trait DurableCache {
    /// Whether this cache actually persists anything.
    fn is_caching(&self) -> bool;
    fn set(&self, tiddler: &Tiddler);
    fn get(&self, tiddler: &Tiddler) -> Option<Tiddler>;
    fn remove(&self, tiddler: &Tiddler);
    /// Every cached tiddler, in insertion order.
    fn list(&self) -> Vec<Tiddler>;
    fn clear(&self);
}

/// `bag/title` with both parts escaped, or `None` for bagless tiddlers.
pub fn cache_key(tiddler: &Tiddler) -> Option<String> {
    tiddler
        .bag_name()
        .map(|bag| format!("{}/{}", escape_key(bag), escape_key(&tiddler.title)))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl DurableCache for NoCache {
    fn is_caching(&self) -> bool {
        false
    }
    fn set(&self, _tiddler: &Tiddler) {}
    fn get(&self, _tiddler: &Tiddler) -> Option<Tiddler> {
        None
    }
    fn remove(&self, _tiddler: &Tiddler) {}
    fn list(&self) -> Vec<Tiddler> {
        Vec::new()
    }
    fn clear(&self) {}
}

#[derive(Default)]
pub struct MemoryCache {
    entries: RefCell<IndexMap<String, Tiddler>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl DurableCache for MemoryCache {
    fn is_caching(&self) -> bool {
        true
    }

    fn set(&self, tiddler: &Tiddler) {
        if let Some(key) = cache_key(tiddler) {
            self.entries.borrow_mut().insert(key, tiddler.clone());
        }
    }

    fn get(&self, tiddler: &Tiddler) -> Option<Tiddler> {
        let key = cache_key(tiddler)?;
        self.entries.borrow().get(&key).cloned()
    }

    fn remove(&self, tiddler: &Tiddler) {
        if let Some(key) = cache_key(tiddler) {
            self.entries.borrow_mut().shift_remove(&key);
        }
    }

    fn list(&self) -> Vec<Tiddler> {
        self.entries.borrow().values().cloned().collect()
    }

    fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

#[derive(Error, Debug)]
enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache quota of {0} entries reached")]
    QuotaExceeded(usize),
}

/// Cache persisted as a single JSON document in `root`.
///
/// Writes go to a temporary file that is renamed over `cache.json`, so a
/// crash never leaves a half-written cache behind.
pub struct FileCache {
    root: PathBuf,
    quota: Option<usize>,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            quota: None,
        }
    }

    /// Refuse to grow beyond `entries` tiddlers. Overwrites are still allowed.
    pub fn with_quota(mut self, entries: usize) -> Self {
        self.quota = Some(entries);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self) -> PathBuf {
        self.root.join(CACHE_FILE)
    }

    fn load(&self) -> Result<IndexMap<String, Tiddler>, CacheError> {
        let path = self.path();
        if !path.exists() {
            return Ok(IndexMap::new());
        }
        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(IndexMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&self, entries: &IndexMap<String, Tiddler>) -> Result<(), CacheError> {
        fs::create_dir_all(&self.root)?;
        let content = serde_json::to_string_pretty(entries)?;
        let tmp_file = self.root.join(format!(".cache-{}.tmp", Uuid::new_v4()));
        fs::write(&tmp_file, content)?;
        fs::rename(&tmp_file, self.path())?;
        Ok(())
    }

    fn update(
        &self,
        change: impl FnOnce(&mut IndexMap<String, Tiddler>) -> Result<(), CacheError>,
    ) -> Result<(), CacheError> {
        let mut entries = self.load()?;
        change(&mut entries)?;
        self.write(&entries)
    }

    fn try_set(&self, key: String, tiddler: &Tiddler) -> Result<(), CacheError> {
        let quota = self.quota;
        self.update(|entries| {
            if let Some(limit) = quota {
                if !entries.contains_key(&key) && entries.len() >= limit {
                    return Err(CacheError::QuotaExceeded(limit));
                }
            }
            entries.insert(key, tiddler.clone());
            Ok(())
        })
    }
}

impl DurableCache for FileCache {
    fn is_caching(&self) -> bool {
        true
    }

    fn set(&self, tiddler: &Tiddler) {
        let Some(key) = cache_key(tiddler) else {
            return;
        };
        if let Err(e) = self.try_set(key, tiddler) {
            warn!(title = %tiddler.title, error = %e, "could not cache tiddler");
        }
    }

    fn get(&self, tiddler: &Tiddler) -> Option<Tiddler> {
        let key = cache_key(tiddler)?;
        match self.load() {
            Ok(mut entries) => entries.shift_remove(&key),
            Err(e) => {
                warn!(error = %e, "could not read cache");
                None
            }
        }
    }

    fn remove(&self, tiddler: &Tiddler) {
        let Some(key) = cache_key(tiddler) else {
            return;
        };
        let result = self.update(|entries| {
            entries.shift_remove(&key);
            Ok(())
        });
        if let Err(e) = result {
            warn!(title = %tiddler.title, error = %e, "could not remove cached tiddler");
        }
    }

    fn list(&self) -> Vec<Tiddler> {
        match self.load() {
            Ok(entries) => entries.into_values().collect(),
            Err(e) => {
                warn!(error = %e, "could not read cache");
                Vec::new()
            }
        }
    }

    fn clear(&self) {
        if let Err(e) = self.write(&IndexMap::new()) {
            warn!(error = %e, "could not clear cache");
        }
    }
}
