//! Core data types shared across the strongbox library
//!
//! ## Overview
//!
//! - **Identifiers**: [`VolumeId`] names a repository, [`ContentId`] names a
//!   stored block
//! - **Namespace views**: [`FileType`], [`Metadata`] and [`DirEntry`] describe
//!   nodes of the directory tree to callers
//! - **Repository views**: [`RepoInfo`] is a read-only snapshot of a
//!   repository's identity and settings; [`RepoConfig`] is the persisted part
//!   of those settings
//!
//! All of these are plain values. Handing one out never exposes internal
//! state, and mutating a returned value has no effect on the repository.

use crate::crypto::{Cipher, Cost, MemLimit, OpsLimit};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Engine version recorded in every repository
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Unique identifier minted once when a repository is created
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeId([u8; 32]);

impl VolumeId {
    /// Generate a new random volume id
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw id bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VolumeId({})", self)
    }
}

/// Address of an encrypted block in the storage backend
///
/// A keyed hash of the block's plaintext, so identical blocks inside one
/// repository share an id while ids reveal nothing across repositories.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId([u8; 32]);

impl ContentId {
    /// Wrap raw id bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw id bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form, 64 characters
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the form produced by [`ContentId::to_hex`]
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", &self.to_hex()[..12])
    }
}

/// Kind of a namespace node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file with version history
    File,
    /// Directory
    Dir,
}

/// Metadata of a node, as of its current committed version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Node kind
    pub ftype: FileType,
    /// Length of the current version, 0 for directories
    pub len: u64,
    /// Current version number, 0 for directories
    pub curr_version: u64,
    /// When the node was created
    pub created_at: DateTime<Utc>,
    /// When the node last changed
    pub modified_at: DateTime<Utc>,
}

impl Metadata {
    /// Whether this node is a file
    pub fn is_file(&self) -> bool {
        self.ftype == FileType::File
    }

    /// Whether this node is a directory
    pub fn is_dir(&self) -> bool {
        self.ftype == FileType::Dir
    }
}

/// One immediate child returned by `read_dir`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Absolute path of the child
    pub path: PathBuf,
    /// Base name of the child
    pub name: String,
    /// Child metadata
    pub metadata: Metadata,
}

impl DirEntry {
    /// Absolute path of the child
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Base name of the child
    pub fn file_name(&self) -> &str {
        &self.name
    }

    /// Child metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// Repository settings persisted in the encrypted super block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Password hashing cost currently wrapping the master key
    pub cost: Cost,
    /// Cipher for every sealed buffer
    pub cipher: Cipher,
    /// Whether blocks are LZ4 compressed before encryption
    pub compress: bool,
    /// Whether block boundaries are content-defined
    pub dedup_chunk: bool,
    /// Default number of versions kept per file
    pub version_limit: u8,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            cost: Cost::default(),
            cipher: Cipher::default(),
            compress: false,
            dedup_chunk: false,
            version_limit: 1,
        }
    }
}

/// Read-only snapshot of a repository's identity and settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    /// Repository id
    pub volume_id: VolumeId,
    /// Engine version that created the repository
    pub version: String,
    /// URI the repository was opened with
    pub uri: String,
    /// Time cost tier of the password wrapping
    pub ops_limit: OpsLimit,
    /// Memory cost tier of the password wrapping
    pub mem_limit: MemLimit,
    /// Cipher in use
    pub cipher: Cipher,
    /// Whether blocks are compressed
    pub compress: bool,
    /// Whether block boundaries are content-defined
    pub dedup_chunk: bool,
    /// Default number of versions kept per file
    pub version_limit: u8,
    /// Whether this instance was opened read-only
    pub read_only: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}
