use crate::{write_atomic, PersistenceError, Result};
use harvest_core::EntityKey;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Outcome of a cache-aware lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Cached<T> {
    /// Served from disk without a network call
    Hit(T),
    /// Fetched and persisted during this call
    Fresh(T),
}

impl<T> Cached<T> {
    pub fn into_inner(self) -> T {
        match self {
            Cached::Hit(v) | Cached::Fresh(v) => v,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Cached::Hit(_))
    }
}

/// One JSON document per (artifact kind, entity), stored as `<kind>_<key>.json`
#[derive(Debug, Clone)]
pub struct JsonCache {
    dir: PathBuf,
}

impl JsonCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: &str, key: &EntityKey) -> PathBuf {
        self.dir.join(format!("{}_{}.json", kind, key))
    }

    /// A cached document, or `None` when absent. An unreadable entry is
    /// treated as absent so it gets refetched.
    pub fn get<T: DeserializeOwned>(&self, kind: &str, key: &EntityKey) -> Option<T> {
        let path = self.path_for(kind, key);
        let bytes = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("⚠️ Ignoring corrupt cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn put<T: Serialize>(&self, kind: &str, key: &EntityKey, value: &T) -> Result<()> {
        let path = self.path_for(kind, key);
        let bytes = serde_json::to_vec_pretty(value)?;
        write_atomic(&path, &bytes)?;
        debug!("💾 Cached {} for {}", kind, key);
        Ok(())
    }

    /// Serve from cache unless `force_refresh`; otherwise fetch, persist, then return.
    ///
    /// A fetch that yields `None` is passed through and nothing is written.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        kind: &str,
        key: &EntityKey,
        force_refresh: bool,
        fetch: F,
    ) -> std::result::Result<Option<Cached<T>>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<PersistenceError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        if !force_refresh {
            if let Some(cached) = self.get(kind, key) {
                debug!("📦 Cache hit: {} for {}", kind, key);
                return Ok(Some(Cached::Hit(cached)));
            }
        }

        match fetch().await? {
            Some(value) => {
                self.put(kind, key, &value)?;
                Ok(Some(Cached::Fresh(value)))
            }
            None => Ok(None),
        }
    }
}
