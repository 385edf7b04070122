//! Pluggable storage backends
//!
//! A repository keeps everything it persists inside one [`Storage`]
//! implementation: a few small metadata records (two copies of the super
//! block and the directory index) and any number of encrypted blocks addressed by
//! [`ContentId`]. Backends only ever see ciphertext.
//!
//! ## Selecting a backend
//!
//! [`open_storage`] picks a backend from the URI scheme:
//!
//! | URI               | Backend                                     |
//! |-------------------|---------------------------------------------|
//! | `mem://<name>`    | [`MemStorage`], shared per name in-process  |
//! | `file://<path>`   | [`FileStorage`], a local directory          |
//!
//! Custom backends implement [`Storage`] and are handed to
//! [`RepoOpener::open_with_storage`](crate::RepoOpener::open_with_storage).
//!
//! ## Contract
//!
//! - `get` of an unknown id fails with [`StrongboxError::NotFound`]
//! - `put_meta` replaces a record atomically; readers observe either the old
//!   or the new record
//! - `delete` of an unknown id is not an error
//! - `lock` admits one open repository instance at a time

mod file;
mod mem;

pub use file::FileStorage;
pub use mem::MemStorage;

use crate::error::{Result, StrongboxError};
use crate::types::ContentId;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

/// Repository metadata records kept beside the blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaKey {
    /// Password-wrapped key material and repository settings
    SuperBlock,
    /// Second copy of the super block, used for repair
    SuperBlockMirror,
    /// Encrypted directory tree
    Index,
}

impl MetaKey {
    /// Stable record name
    pub fn name(self) -> &'static str {
        match self {
            MetaKey::SuperBlock => "super_blk",
            MetaKey::SuperBlockMirror => "super_blk_mirror",
            MetaKey::Index => "index",
        }
    }
}

/// Key-value store for opaque encrypted records
pub trait Storage: Send + Sync + Debug {
    /// Whether a repository has been created in this storage
    fn exists(&self) -> Result<bool>;

    /// Whether [`Storage::exists`] works without opening the repository
    fn supports_exists(&self) -> bool {
        true
    }

    /// Prepare empty storage for a new repository
    fn init(&self) -> Result<()>;

    /// Claim exclusive use; `force` overrides a stale claim
    fn lock(&self, force: bool) -> Result<()>;

    /// Release the claim taken by [`Storage::lock`]
    fn unlock(&self) -> Result<()>;

    /// Read a metadata record
    fn get_meta(&self, key: MetaKey) -> Result<Vec<u8>>;

    /// Atomically replace a metadata record
    fn put_meta(&self, key: MetaKey, data: &[u8]) -> Result<()>;

    /// Read a block
    fn get(&self, id: &ContentId) -> Result<Vec<u8>>;

    /// Write a block
    fn put(&self, id: &ContentId, data: &[u8]) -> Result<()>;

    /// Remove a block
    fn delete(&self, id: &ContentId) -> Result<()>;

    /// Push buffered writes to durable storage
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Where a URI points
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Location {
    Mem(String),
    File(PathBuf),
}

/// Parse a repository URI
///
/// # Errors
///
/// - [`StrongboxError::InvalidUri`] if the URI has no `://`, an empty
///   location, or an unsupported scheme
pub(crate) fn parse_uri(uri: &str) -> Result<Location> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| StrongboxError::InvalidUri(uri.to_string()))?;
    if rest.is_empty() {
        return Err(StrongboxError::InvalidUri(uri.to_string()));
    }

    match scheme {
        "mem" => Ok(Location::Mem(rest.to_string())),
        "file" => Ok(Location::File(PathBuf::from(rest))),
        _ => Err(StrongboxError::InvalidUri(uri.to_string())),
    }
}

/// Open the backend a URI names
///
/// Opening a backend touches nothing; whether a repository lives there is
/// asked separately through [`Storage::exists`].
pub fn open_storage(uri: &str) -> Result<Arc<dyn Storage>> {
    match parse_uri(uri)? {
        Location::Mem(name) => Ok(MemStorage::named(&name)),
        Location::File(path) => Ok(Arc::new(FileStorage::new(path))),
    }
}

/// The backend a URI names, or `None` for a memory volume never opened
///
/// Unlike [`open_storage`] this never registers a new memory volume.
pub(crate) fn existing_storage(uri: &str) -> Result<Option<Arc<dyn Storage>>> {
    match parse_uri(uri)? {
        Location::Mem(name) => Ok(MemStorage::lookup(&name).map(|s| s as Arc<dyn Storage>)),
        Location::File(path) => Ok(Some(Arc::new(FileStorage::new(path)))),
    }
}
