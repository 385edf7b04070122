//! In-memory storage backend
//!
//! Named volumes (`mem://<name>`) live in a process-wide registry, so a
//! repository closed and reopened under the same name within one process
//! sees its earlier content. Anonymous volumes from [`MemStorage::new`] are
//! private to whoever holds them.

use super::{MetaKey, Storage};
use crate::error::{Result, StrongboxError};
use crate::types::ContentId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::trace;

static VOLUMES: LazyLock<DashMap<String, Arc<MemStorage>>> = LazyLock::new(DashMap::new);

/// Storage backed by concurrent hash maps
#[derive(Debug, Default)]
pub struct MemStorage {
    meta: DashMap<MetaKey, Vec<u8>>,
    objects: DashMap<ContentId, Vec<u8>>,
    locked: AtomicBool,
}

impl MemStorage {
    /// Create an anonymous volume
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create the process-wide volume with this name
    pub fn named(name: &str) -> Arc<MemStorage> {
        VOLUMES
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemStorage::new()))
            .clone()
    }

    /// The process-wide volume with this name, if one was ever opened
    pub fn lookup(name: &str) -> Option<Arc<MemStorage>> {
        VOLUMES.get(name).map(|v| v.value().clone())
    }

    /// Number of blocks currently stored
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

impl Storage for MemStorage {
    fn exists(&self) -> Result<bool> {
        Ok(self.meta.contains_key(&MetaKey::SuperBlock))
    }

    fn init(&self) -> Result<()> {
        if self.exists()? {
            return Err(StrongboxError::AlreadyExists("memory volume".to_string()));
        }
        // Leftovers from a creation that failed halfway
        self.meta.clear();
        self.objects.clear();
        Ok(())
    }

    fn lock(&self, force: bool) -> Result<()> {
        if self.locked.swap(true, Ordering::AcqRel) && !force {
            return Err(StrongboxError::RepoOpened("memory volume".to_string()));
        }
        Ok(())
    }

    fn unlock(&self) -> Result<()> {
        self.locked.store(false, Ordering::Release);
        Ok(())
    }

    fn get_meta(&self, key: MetaKey) -> Result<Vec<u8>> {
        self.meta
            .get(&key)
            .map(|v| v.value().clone())
            .ok_or_else(|| StrongboxError::NotFound(key.name().to_string()))
    }

    fn put_meta(&self, key: MetaKey, data: &[u8]) -> Result<()> {
        self.meta.insert(key, data.to_vec());
        Ok(())
    }

    fn get(&self, id: &ContentId) -> Result<Vec<u8>> {
        trace!("mem get {}", id);
        self.objects
            .get(id)
            .map(|v| v.value().clone())
            .ok_or_else(|| StrongboxError::NotFound(format!("object {}", id)))
    }

    fn put(&self, id: &ContentId, data: &[u8]) -> Result<()> {
        trace!("mem put {} ({} bytes)", id, data.len());
        self.objects.insert(*id, data.to_vec());
        Ok(())
    }

    fn delete(&self, id: &ContentId) -> Result<()> {
        self.objects.remove(id);
        Ok(())
    }
}
