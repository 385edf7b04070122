//! Local directory storage backend
//!
//! ## Layout
//!
//! ```text
//! root/
//! ├── layout.json            # Storage format descriptor (plaintext)
//! ├── super_blk              # Password-wrapped super block
//! ├── index                  # Encrypted directory tree
//! ├── repo.lock              # Present while a repository instance is open
//! └── objects/               # Encrypted blocks (sharded)
//!     └── <prefix>/          # First 2 hex chars of the content id
//!         └── <suffix>       # Remaining 62 hex chars
//! ```
//!
//! Every record is written to a temporary file in its target directory and
//! renamed into place, so a crash never leaves a torn record behind.

use super::{MetaKey, Storage};
use crate::error::{Result, StrongboxError};
use crate::types::{ContentId, ENGINE_VERSION};
use crate::utils::atomic_write;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const LAYOUT_FILE: &str = "layout.json";
const OBJECTS_DIR: &str = "objects";
const LOCK_FILE: &str = "repo.lock";
const FORMAT_VERSION: u32 = 1;

/// Plaintext descriptor written when the storage is initialized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageLayout {
    /// On-disk format version
    pub format_version: u32,
    /// Engine version that created the storage
    pub engine_version: String,
    /// When the storage was initialized
    pub created_at: DateTime<Utc>,
}

/// Storage in a local directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Storage rooted at `root`; nothing is touched until [`Storage::init`]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the plaintext layout descriptor
    pub fn layout(&self) -> Result<StorageLayout> {
        let json = fs::read_to_string(self.root.join(LAYOUT_FILE)).map_err(not_found(LAYOUT_FILE))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Get path for an object (with sharding)
    pub fn object_path(&self, id: &ContentId) -> PathBuf {
        let hex = id.to_hex();
        let (prefix, suffix) = hex.split_at(2);
        self.root.join(OBJECTS_DIR).join(prefix).join(suffix)
    }

    fn meta_path(&self, key: MetaKey) -> PathBuf {
        self.root.join(key.name())
    }
}

fn not_found(what: impl Into<String>) -> impl FnOnce(io::Error) -> StrongboxError {
    let what = what.into();
    move |err| {
        if err.kind() == io::ErrorKind::NotFound {
            StrongboxError::NotFound(what)
        } else {
            StrongboxError::Io(err)
        }
    }
}

impl Storage for FileStorage {
    fn exists(&self) -> Result<bool> {
        Ok(self.meta_path(MetaKey::SuperBlock).is_file())
    }

    fn init(&self) -> Result<()> {
        if self.exists()? {
            return Err(StrongboxError::AlreadyExists(self.root.display().to_string()));
        }

        fs::create_dir_all(self.root.join(OBJECTS_DIR))?;
        let layout = StorageLayout {
            format_version: FORMAT_VERSION,
            engine_version: ENGINE_VERSION.to_string(),
            created_at: Utc::now(),
        };
        atomic_write(
            &self.root.join(LAYOUT_FILE),
            serde_json::to_string_pretty(&layout)?.as_bytes(),
        )?;

        debug!("Initialized file storage at {:?}", self.root);
        Ok(())
    }

    fn lock(&self, force: bool) -> Result<()> {
        let path = self.root.join(LOCK_FILE);
        let opened = fs::OpenOptions::new().write(true).create_new(true).open(&path);
        let mut file = match opened {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && force => {
                debug!("Taking over stale lock at {:?}", path);
                fs::File::create(&path)?
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StrongboxError::RepoOpened(self.root.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", Utc::now().to_rfc3339())?;
        Ok(())
    }

    fn unlock(&self) -> Result<()> {
        match fs::remove_file(self.root.join(LOCK_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn get_meta(&self, key: MetaKey) -> Result<Vec<u8>> {
        fs::read(self.meta_path(key)).map_err(not_found(key.name()))
    }

    fn put_meta(&self, key: MetaKey, data: &[u8]) -> Result<()> {
        atomic_write(&self.meta_path(key), data)
    }

    fn get(&self, id: &ContentId) -> Result<Vec<u8>> {
        trace!("file get {}", id);
        fs::read(self.object_path(id)).map_err(not_found(format!("object {}", id)))
    }

    fn put(&self, id: &ContentId, data: &[u8]) -> Result<()> {
        let path = self.object_path(id);
        if let Some(shard) = path.parent() {
            fs::create_dir_all(shard)?;
        }
        trace!("file put {} ({} bytes)", id, data.len());
        atomic_write(&path, data)
    }

    fn delete(&self, id: &ContentId) -> Result<()> {
        match fs::remove_file(self.object_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
