//! The authorization cache.
//!
//! After a successful key request, the authorization artifact (not the key) is stored under a
//! hash of the conjunction it proves, so later messages sealed for the same conjunction can be
//! unsealed without another interactive session until the artifact expires.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::identity::Attribute;
use crate::util::now;

/// The cache key of a conjunction: the hex SHA-256 digest of its canonical JSON form.
///
/// The canonical form is sorted by type, then value, so the order in which the attributes
/// were requested does not matter.
pub fn hash_con(con: &[Attribute]) -> Result<String, Error> {
    let mut sorted = con.to_vec();
    sorted.sort();

    let json = serde_json::to_string(&sorted)?;

    Ok(hex::encode(Sha256::digest(json.as_bytes())))
}

/// A cached authorization artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The artifact (a JWT).
    pub artifact: String,
    /// Expiry of the artifact (UNIX time).
    pub exp: u64,
}

/// The result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// A valid artifact.
    Hit(String),
    /// Nothing stored.
    Miss,
    /// The stored artifact has expired, which counts as a miss.
    Expired,
}

/// A process-wide cache of authorization artifacts.
///
/// Clones share the same entries. When opened from a file, every mutation is written
/// through.
#[derive(Debug, Clone, Default)]
pub struct KeyCache {
    entries: Arc<Mutex<BTreeMap<String, CacheEntry>>>,
    path: Option<Arc<PathBuf>>,
}

impl KeyCache {
    /// An in-memory cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache persisted at `path`. A missing file is an empty cache.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(KeyCache {
            entries: Arc::new(Mutex::new(entries)),
            path: Some(Arc::new(path)),
        })
    }

    fn persist(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<(), Error> {
        if let Some(path) = &self.path {
            std::fs::write(path.as_ref(), serde_json::to_vec(entries)?)?;
        }

        Ok(())
    }

    /// Look up the artifact for a conjunction at time `now`.
    pub fn lookup(&self, con: &[Attribute], now: u64) -> Result<Lookup, Error> {
        let key = hash_con(con)?;
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        Ok(match entries.get(&key) {
            Some(entry) if entry.exp > now => Lookup::Hit(entry.artifact.clone()),
            Some(_) => Lookup::Expired,
            None => Lookup::Miss,
        })
    }

    /// Store (or overwrite) the artifact for a conjunction.
    pub fn insert(&self, con: &[Attribute], artifact: &str, exp: u64) -> Result<(), Error> {
        let key = hash_con(con)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        entries.insert(
            key,
            CacheEntry {
                artifact: artifact.to_string(),
                exp,
            },
        );

        self.persist(&entries)
    }

    /// Forget the artifact for a conjunction, e.g. after the server rejected it.
    pub fn remove(&self, con: &[Attribute]) -> Result<(), Error> {
        let key = hash_con(con)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if entries.remove(&key).is_some() {
            self.persist(&entries)?;
        }

        Ok(())
    }

    /// Delete every entry that has expired at `now`, returning how many.
    ///
    /// Expiry is checked under the lock at deletion time, so an entry written concurrently is
    /// never lost.
    pub fn sweep(&self, now: u64) -> Result<usize, Error> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let before = entries.len();
        entries.retain(|_, entry| entry.exp > now);
        let removed = before - entries.len();

        if removed > 0 {
            self.persist(&entries)?;
        }

        Ok(removed)
    }

    /// The number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep the cache every `period` on the tokio runtime.
    pub fn spawn_sweeper(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;

                match cache.sweep(now()) {
                    Ok(0) => {}
                    Ok(n) => debug!("cache: swept {n} expired artifact(s)"),
                    Err(e) => warn!("cache: sweep failed: {e}"),
                }
            }
        })
    }
}
