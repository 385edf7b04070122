//! # Strongbox - Encrypted, versioned virtual filesystem
//!
//! An embeddable filesystem that keeps directories and files inside a
//! pluggable key-value storage backend, encrypting every byte it stores and
//! retaining a bounded history of versions per file.
//!
//! ## Overview
//!
//! - Password protected repositories: the password unwraps a random master
//!   key, so changing it never re-encrypts content
//! - Authenticated encryption of every block with XChaCha20-Poly1305 or
//!   AES-256-GCM
//! - Per-file version history with oldest-first eviction
//! - Streaming file I/O through `std::io::{Read, Write, Seek}`
//! - Block level deduplication inside one repository
//! - In-memory and local directory backends, plus custom ones through the
//!   [`Storage`] trait
//!
//! ## Quick Start
//!
//! ```rust
//! use std::io::{Read, Seek, SeekFrom, Write};
//! use strongbox::{init_env, RepoOpener};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Once per process, before any repository is opened
//! init_env()?;
//!
//! let repo = RepoOpener::new()
//!     .create(true)
//!     .version_limit(2)
//!     .open("mem://quick-start", "your password")?;
//!
//! let mut file = repo.create_file("/my_file.txt")?;
//! file.write_all(b"Hello, world!")?;
//! file.finish()?;
//!
//! let mut content = String::new();
//! file.seek(SeekFrom::Start(0))?;
//! file.read_to_string(&mut content)?;
//! assert_eq!(content, "Hello, world!");
//! assert_eq!(file.history()?.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Versions
//!
//! Writes to a file build a provisional version that only becomes visible
//! when [`File::finish`] commits it. Every file starts with an empty version
//! 1. Once more versions exist than the file's limit allows, the oldest is
//! evicted. A [`VersionReader`] keeps reading the version it was opened on
//! regardless.
//!
//! ### Storage URIs
//!
//! | URI               | Backend                                     |
//! |-------------------|---------------------------------------------|
//! | `mem://<name>`    | In-process memory, shared per name          |
//! | `file://<path>`   | A local directory                           |
//!
//! ### What the backend sees
//!
//! Backends store three kinds of records, all opaque: a super block holding
//! the password-wrapped master key, the encrypted directory index, and
//! encrypted blocks named by keyed hashes of their plaintext.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`], with [`StrongboxError`] as the error
//! type. [`StrongboxError::code`] maps each category to a stable integer for
//! foreign bindings. Errors from the `std::io` trait impls on [`File`] carry
//! the original `StrongboxError` inside.
//!
//! ## Module Organization
//!
//! - [`repo`]: Opening repositories and path based operations
//! - [`file`]: File handles, open options and version readers
//! - [`crypto`]: Key derivation, cost tiers and ciphers
//! - [`storage`]: Backend trait and built-in backends
//! - [`compression`]: LZ4 block compression
//! - [`types`]: Common types and data structures
//! - [`error`]: Error types and handling

// Public API modules
pub mod compression;
pub mod crypto;
pub mod error;
pub mod file;
pub mod repo;
pub mod storage;
pub mod types;

// Internal modules (not part of public API)
mod content;
mod super_block;
mod tree;
mod utils;
mod version;

// Re-export main types for convenience
pub use content::MAX_FILE_LEN;
pub use crypto::{Cipher, MemLimit, OpsLimit};
pub use error::{Result, StrongboxError};
pub use file::{File, OpenOptions, VersionReader};
pub use repo::{Repo, RepoOpener};
pub use storage::{MemStorage, Storage};
pub use types::{DirEntry, FileType, Metadata, RepoInfo};
pub use version::Version;

use std::sync::OnceLock;
use tracing::info;

static ENV: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Initialize the library
///
/// Runs a known-answer self test of the cryptographic primitives the first
/// time it is called and records the outcome; later calls return the same
/// outcome. Must succeed before any repository is opened.
///
/// # Errors
///
/// - [`StrongboxError::Crypto`] if the self test fails
pub fn init_env() -> Result<()> {
    let outcome = ENV.get_or_init(|| {
        let outcome = crypto::self_test().map_err(|e| e.to_string());
        info!("Initialized strongbox {} (self test ok: {})", types::ENGINE_VERSION, outcome.is_ok());
        outcome
    });
    outcome.clone().map_err(StrongboxError::Crypto)
}

/// Fail unless [`init_env`] has completed successfully
pub(crate) fn ensure_env() -> Result<()> {
    match ENV.get() {
        Some(Ok(())) => Ok(()),
        _ => Err(StrongboxError::Uninitialized),
    }
}
