//! Repository facade
//!
//! A [`Repo`] is one open, password-unlocked repository. It owns the
//! directory tree, the block store and the storage backend for as long as it
//! is open, and exposes every path based operation.
//!
//! ## Opening
//!
//! Repositories are opened through [`RepoOpener`], a consuming builder:
//!
//! ```rust
//! use strongbox::{init_env, RepoOpener};
//!
//! # fn main() -> strongbox::Result<()> {
//! init_env()?;
//! let repo = RepoOpener::new()
//!     .create(true)
//!     .version_limit(3)
//!     .open("mem://repo-module-doc", "pwd")?;
//! repo.create_dir_all("/a/b")?;
//! assert!(repo.is_dir("/a/b"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Consistency
//!
//! The tree and the registry of active writers sit behind one lock. Every
//! structural change and every version commit is applied to a copy of the
//! tree, the copy is sealed and persisted as the new index, and only then is
//! it swapped in. Block reference counts are adjusted last, so a failure at
//! any step leaves both the in-memory tree and the stored index as they were.
//!
//! ## Closing
//!
//! [`Repo::close`] (or dropping the `Repo`) releases the backend lock. File
//! handles and version readers outliving the repository fail with
//! [`StrongboxError::RepoClosed`] from then on.

use crate::compression::{CompressionEngine, CompressionStrategy};
use crate::content::{BlockRef, ContentReader, ContentStore, Draft};
use crate::crypto::{Cipher, Cost, Crypto, MemLimit, OpsLimit};
use crate::error::{Result, StrongboxError};
use crate::file::{File, OpenOptions};
use crate::storage::{existing_storage, open_storage, MetaKey, Storage};
use crate::super_block::SuperBlock;
use crate::tree::{DirTree, NodeId};
use crate::types::{DirEntry, Metadata, RepoConfig, RepoInfo};
use crate::version::{validate_limit, Version};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const INDEX_LABEL: &[u8] = b"index";

/// Block reference changes applied after a tree change is persisted
#[derive(Debug, Default)]
struct Settle {
    retain: Vec<BlockRef>,
    release: Vec<BlockRef>,
    unpin: Vec<BlockRef>,
}

impl Settle {
    fn releasing<'a>(versions: impl IntoIterator<Item = &'a Version>) -> Self {
        Self {
            release: versions.into_iter().flat_map(|v| v.blocks().iter().copied()).collect(),
            ..Self::default()
        }
    }
}

struct RepoState {
    tree: DirTree,
    writers: HashSet<NodeId>,
}

/// State shared by a repository and every handle opened from it
pub(crate) struct RepoShared {
    uri: String,
    read_only: bool,
    version_limit: u8,
    storage: Arc<dyn Storage>,
    store: Arc<ContentStore>,
    super_block: Mutex<SuperBlock>,
    state: Mutex<RepoState>,
}

impl std::fmt::Debug for RepoShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RepoShared")
            .field("uri", &self.uri)
            .field("read_only", &self.read_only)
            .field("nodes", &state.tree.len())
            .field("writers", &state.writers.len())
            .field("referenced_blocks", &self.store.referenced_blocks())
            .field("pinned_blocks", &self.store.pinned_blocks())
            .finish()
    }
}

impl RepoShared {
    fn assemble(
        uri: &str,
        read_only: bool,
        storage: Arc<dyn Storage>,
        super_block: SuperBlock,
        tree: Option<DirTree>,
    ) -> Result<Self> {
        let config = &super_block.body.config;
        let version_limit = config.version_limit;
        let store = ContentStore::new(
            storage.clone(),
            Crypto::new(config.cipher),
            &super_block.body.master_key,
            CompressionEngine::new(CompressionStrategy::from_flag(config.compress)),
            config.dedup_chunk,
        )?;

        let tree = match tree {
            Some(tree) => tree,
            None => load_index(&store, storage.as_ref())?,
        };
        store.reset_refs(tree.all_blocks());

        Ok(Self {
            uri: uri.to_string(),
            read_only,
            version_limit,
            storage,
            store: Arc::new(store),
            super_block: Mutex::new(super_block),
            state: Mutex::new(RepoState {
                tree,
                writers: HashSet::new(),
            }),
        })
    }

    pub fn ensure_open(&self) -> Result<()> {
        self.store.ensure_open()
    }

    pub fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(StrongboxError::ReadOnlyRepo);
        }
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn persist_index(&self, tree: &DirTree) -> Result<()> {
        let plain = bincode::serde::encode_to_vec(tree, bincode::config::standard())?;
        let sealed = self.store.seal_record(INDEX_LABEL, &plain)?;
        self.storage.put_meta(MetaKey::Index, &sealed)
    }

    /// Apply a tree change: mutate a copy, persist it, swap it in, settle refs
    fn apply<T>(&self, op: impl FnOnce(&HashSet<NodeId>, &mut DirTree) -> Result<(T, Settle)>) -> Result<T> {
        let mut state = self.state.lock();
        self.ensure_open()?;

        let mut next = state.tree.clone();
        let (out, settle) = op(&state.writers, &mut next)?;
        self.persist_index(&next)?;
        state.tree = next;

        self.store.retain(&settle.retain);
        self.store.release(&settle.release);
        self.store.unpin(&settle.unpin);
        Ok(out)
    }

    fn query<T>(&self, op: impl FnOnce(&DirTree) -> Result<T>) -> Result<T> {
        let state = self.state.lock();
        self.ensure_open()?;
        op(&state.tree)
    }

    /// Resolve a file for opening, creating it when asked
    pub fn resolve_file(&self, path: &Path, create: bool, create_new: bool, limit: Option<u8>) -> Result<NodeId> {
        if !create && !create_new {
            return self.query(|tree| tree.lookup_file(path));
        }
        if !create_new {
            match self.query(|tree| tree.lookup_file(path)) {
                Err(StrongboxError::NotFound(_)) => {}
                other => return other,
            }
        }

        self.ensure_writable()?;
        let limit = limit.unwrap_or(self.version_limit);
        let id = self.apply(|_, tree| Ok((tree.create_file(path, limit)?, Settle::default())))?;
        debug!("Created file {:?}", path);
        Ok(id)
    }

    pub fn metadata_of(&self, node: NodeId) -> Result<Metadata> {
        self.query(|tree| Ok(tree.node(node)?.metadata()))
    }

    pub fn history_of(&self, node: NodeId) -> Result<Vec<Version>> {
        self.query(|tree| Ok(tree.versions(node)?.history()))
    }

    /// Number and length of the current version
    pub fn current_of(&self, node: NodeId) -> Result<(u64, u64)> {
        self.query(|tree| {
            let current = tree.versions(node)?.current();
            Ok((current.num(), current.len()))
        })
    }

    /// Pin a version of a file for reading; `None` means the current one
    pub fn open_reader(&self, node: NodeId, num: Option<u64>) -> Result<(u64, ContentReader)> {
        self.query(|tree| {
            let versions = tree.versions(node)?;
            let version = match num {
                None => versions.current(),
                Some(n) => versions.get(n).ok_or(StrongboxError::VersionNotFound(n))?,
            };
            Ok((
                version.num(),
                ContentReader::new(self.store.clone(), version.blocks().to_vec()),
            ))
        })
    }

    /// Become the single writer of a file
    pub fn claim_writer(&self, node: NodeId, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        self.ensure_writable()?;
        state.tree.node(node)?;
        if !state.writers.insert(node) {
            return Err(StrongboxError::FileInUse(path.display().to_string()));
        }
        Ok(())
    }

    pub fn release_writer(&self, node: NodeId) {
        self.state.lock().writers.remove(&node);
    }

    /// Commit a draft as the next version of a file
    ///
    /// New blocks are stored before the tree lock is taken. They stay pinned
    /// until the version referencing them is persisted, and are unpinned
    /// (and so collected) if the commit fails.
    pub fn commit_draft(&self, node: NodeId, draft: &mut Draft) -> Result<Version> {
        self.ensure_writable()?;
        let (blocks, pinned) = self.store.commit_draft(draft)?;
        let len = draft.len();

        let committed = self.apply(|_, tree| {
            let version = Version::new(tree.versions(node)?.next_num(), len, blocks.clone());
            let evicted = tree.commit_version(node, version.clone())?;
            if let Some(old) = &evicted {
                debug!("Evicted version {} of {:?}", old.num(), node);
            }
            let mut settle = Settle::releasing(evicted.iter());
            settle.retain = blocks.clone();
            settle.unpin = pinned.clone();
            Ok((version, settle))
        });

        match committed {
            Ok(version) => {
                debug!("Committed version {} ({} bytes)", version.num(), version.len());
                Ok(version)
            }
            Err(e) => {
                self.store.unpin(&pinned);
                Err(e)
            }
        }
    }

    fn close(&self) -> Result<()> {
        let _state = self.state.lock();
        if !self.store.close() {
            return Ok(());
        }
        let flushed = self.storage.flush();
        let unlocked = self.storage.unlock();
        info!("Closed repository {}", self.uri);
        flushed.and(unlocked)
    }
}

fn load_index(store: &ContentStore, storage: &dyn Storage) -> Result<DirTree> {
    let sealed = storage.get_meta(MetaKey::Index).map_err(|e| match e {
        StrongboxError::NotFound(_) => StrongboxError::corrupted("directory index is missing"),
        other => other,
    })?;
    let plain = store.open_record(INDEX_LABEL, &sealed)?;
    let (tree, _): (DirTree, usize) = bincode::serde::decode_from_slice(&plain, bincode::config::standard())?;
    debug!("Loaded directory index with {} nodes", tree.len());
    Ok(tree)
}

fn unlock_on_err<T>(storage: &dyn Storage, result: Result<T>) -> Result<T> {
    if result.is_err() {
        if let Err(e) = storage.unlock() {
            warn!("Failed to release storage lock: {}", e);
        }
    }
    result
}

/// Builder for opening or creating a repository
///
/// Settings other than `read_only` and `force` only take effect when a new
/// repository is created; an existing repository keeps the settings it was
/// created with.
///
/// # Examples
///
/// ```rust
/// use strongbox::{init_env, Cipher, MemLimit, OpsLimit, RepoOpener};
///
/// # fn main() -> strongbox::Result<()> {
/// init_env()?;
/// let repo = RepoOpener::new()
///     .ops_limit(OpsLimit::Interactive)
///     .mem_limit(MemLimit::Interactive)
///     .cipher(Cipher::Aes)
///     .create_new(true)
///     .compress(true)
///     .open("mem://opener-doc", "pwd")?;
/// assert!(repo.info().compress);
/// # Ok(())
/// # }
/// ```
///
/// # Default Values
///
/// - `ops_limit` / `mem_limit`: `Interactive`
/// - `cipher`: `Xchacha`
/// - `create` / `create_new`: false
/// - `compress` / `dedup_chunk`: false
/// - `version_limit`: 1
/// - `read_only` / `force`: false
#[derive(Debug, Clone)]
pub struct RepoOpener {
    cost: Cost,
    cipher: Cipher,
    create: bool,
    create_new: bool,
    compress: bool,
    dedup_chunk: bool,
    version_limit: u8,
    read_only: bool,
    force: bool,
}

impl RepoOpener {
    /// Create an opener with default settings
    pub fn new() -> Self {
        let config = RepoConfig::default();
        Self {
            cost: config.cost,
            cipher: config.cipher,
            create: false,
            create_new: false,
            compress: config.compress,
            dedup_chunk: config.dedup_chunk,
            version_limit: config.version_limit,
            read_only: false,
            force: false,
        }
    }

    /// Set the password hashing time cost
    pub fn ops_limit(mut self, limit: OpsLimit) -> Self {
        self.cost.ops = limit;
        self
    }

    /// Set the password hashing memory cost
    pub fn mem_limit(mut self, limit: MemLimit) -> Self {
        self.cost.mem = limit;
        self
    }

    /// Set the cipher used for every sealed buffer
    pub fn cipher(mut self, cipher: Cipher) -> Self {
        self.cipher = cipher;
        self
    }

    /// Create the repository if it does not exist
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Always create a new repository, failing if one exists
    ///
    /// Implies `create`.
    pub fn create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        if create_new {
            self.create = true;
        }
        self
    }

    /// Compress blocks with LZ4 before encryption
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Cut content at content-defined boundaries instead of a fixed grid
    ///
    /// Blocks stay shareable between versions after bytes are inserted or
    /// removed mid-file, at the cost of re-reading the whole file on every
    /// commit.
    pub fn dedup_chunk(mut self, dedup_chunk: bool) -> Self {
        self.dedup_chunk = dedup_chunk;
        self
    }

    /// Default number of versions kept per file, at least 1
    pub fn version_limit(mut self, limit: u8) -> Self {
        self.version_limit = limit;
        self
    }

    /// Open without write access
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Take over a repository whose lock was left behind
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Open the repository at `uri`
    ///
    /// # Arguments
    ///
    /// * `uri` - `mem://<name>` or `file://<path>`
    /// * `pwd` - Repository password
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::Uninitialized`] if [`init_env`](crate::init_env) has not run
    /// - [`StrongboxError::InvalidUri`] for a malformed or unsupported URI
    /// - [`StrongboxError::InvalidInput`] for `create` with `read_only`, or a
    ///   version limit of 0
    /// - [`StrongboxError::NotFound`] if the repository is missing and
    ///   `create` is not set
    /// - [`StrongboxError::AlreadyExists`] if the repository exists and
    ///   `create_new` is set
    /// - [`StrongboxError::WrongPassword`] if `pwd` does not unlock it
    /// - [`StrongboxError::RepoOpened`] if it is already open elsewhere
    pub fn open(self, uri: &str, pwd: &str) -> Result<Repo> {
        crate::ensure_env()?;
        let storage = open_storage(uri)?;
        self.open_with_storage(uri, storage, pwd)
    }

    /// Open a repository kept in a caller supplied backend
    ///
    /// `uri` is only recorded for [`Repo::info`]; it is not parsed.
    #[instrument(skip(self, storage, pwd))]
    pub fn open_with_storage(self, uri: &str, storage: Arc<dyn Storage>, pwd: &str) -> Result<Repo> {
        crate::ensure_env()?;
        if self.read_only && (self.create || self.create_new) {
            return Err(StrongboxError::invalid_input("cannot create a read-only repository"));
        }
        validate_limit(self.version_limit)?;

        let shared = if storage.exists()? {
            if self.create_new {
                return Err(StrongboxError::AlreadyExists(uri.to_string()));
            }
            self.open_existing(uri, storage, pwd)?
        } else if self.create || self.create_new {
            self.create_repo(uri, storage, pwd)?
        } else {
            return Err(StrongboxError::NotFound(uri.to_string()));
        };

        Ok(Repo {
            shared: Arc::new(shared),
        })
    }

    fn create_repo(&self, uri: &str, storage: Arc<dyn Storage>, pwd: &str) -> Result<RepoShared> {
        info!("Creating repository at {}", uri);
        storage.init()?;
        storage.lock(self.force)?;

        let config = RepoConfig {
            cost: self.cost,
            cipher: self.cipher,
            compress: self.compress,
            dedup_chunk: self.dedup_chunk,
            version_limit: self.version_limit,
        };
        let created = RepoShared::assemble(uri, false, storage.clone(), SuperBlock::new(uri, config), Some(DirTree::new()))
            .and_then(|shared| {
                // The index goes first: the super block marks the repository as existing
                shared.persist_index(&DirTree::new())?;
                shared.super_block.lock().save(shared.storage.as_ref(), pwd)?;
                Ok(shared)
            });
        unlock_on_err(storage.as_ref(), created)
    }

    fn open_existing(&self, uri: &str, storage: Arc<dyn Storage>, pwd: &str) -> Result<RepoShared> {
        info!("Opening repository at {}", uri);
        storage.lock(self.force)?;
        let opened = SuperBlock::load(storage.as_ref(), pwd)
            .and_then(|sb| RepoShared::assemble(uri, self.read_only, storage.clone(), sb, None));
        unlock_on_err(storage.as_ref(), opened)
    }
}

impl Default for RepoOpener {
    fn default() -> Self {
        Self::new()
    }
}

/// An open repository
///
/// All operations take `&self`; a `Repo` can be shared between threads.
/// Paths are absolute and `/`-separated.
pub struct Repo {
    shared: Arc<RepoShared>,
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repo").field("shared", &self.shared).finish()
    }
}

impl Repo {
    pub(crate) fn shared(&self) -> &Arc<RepoShared> {
        &self.shared
    }

    /// Whether a repository exists at `uri`
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::InvalidUri`] for a malformed or unsupported URI
    /// - [`StrongboxError::Uninitialized`] if [`init_env`](crate::init_env) has not run
    pub fn exists(uri: &str) -> Result<bool> {
        crate::ensure_env()?;
        let Some(storage) = existing_storage(uri)? else {
            return Ok(false);
        };
        if !storage.supports_exists() {
            return Err(StrongboxError::backend("storage cannot check existence without opening"));
        }
        storage.exists()
    }

    /// Repair a damaged super block from its second copy
    ///
    /// The super block is stored twice. A save interrupted between the two
    /// writes, for example during [`Repo::reset_password`], leaves copies
    /// that no longer agree and the repository refuses to open. This rewrites
    /// the stale or damaged copy from the newer intact one. Intact copies are
    /// left alone.
    ///
    /// The repository must not be open.
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::NotFound`] if no repository exists at `uri`
    /// - [`StrongboxError::RepoOpened`] if the repository is open
    /// - [`StrongboxError::WrongPassword`] if neither copy unseals with `pwd`
    #[instrument(skip(pwd))]
    pub fn repair_super_block(uri: &str, pwd: &str) -> Result<()> {
        crate::ensure_env()?;
        let storage = existing_storage(uri)?.ok_or_else(|| StrongboxError::NotFound(uri.to_string()))?;
        // Only the primary copy marks existence, and it may be the damaged one
        if !storage.exists()? && storage.get_meta(MetaKey::SuperBlockMirror).is_err() {
            return Err(StrongboxError::NotFound(uri.to_string()));
        }
        storage.lock(false)?;
        let repaired = SuperBlock::repair(storage.as_ref(), pwd);
        let unlocked = storage.unlock();
        if repaired? {
            info!("Repaired super block of {}", uri);
        }
        unlocked
    }

    /// Snapshot of the repository's identity and settings
    pub fn info(&self) -> RepoInfo {
        let sb = self.shared.super_block.lock();
        RepoInfo {
            volume_id: sb.body.volume_id,
            version: sb.body.engine_version.clone(),
            uri: self.shared.uri.clone(),
            ops_limit: sb.head.cost.ops,
            mem_limit: sb.head.cost.mem,
            cipher: sb.head.cipher,
            compress: sb.body.config.compress,
            dedup_chunk: sb.body.config.dedup_chunk,
            version_limit: sb.body.config.version_limit,
            read_only: self.shared.read_only,
            created_at: sb.body.created_at,
        }
    }

    /// Change the repository password and its hashing cost
    ///
    /// Only the wrapping of the master key changes; stored content is not
    /// touched.
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::WrongPassword`] if `old_pwd` is wrong; the old
    ///   password keeps working
    /// - [`StrongboxError::ReadOnlyRepo`] on a read-only repository
    #[instrument(skip(self, old_pwd, new_pwd))]
    pub fn reset_password(&self, old_pwd: &str, new_pwd: &str, ops_limit: OpsLimit, mem_limit: MemLimit) -> Result<()> {
        crate::ensure_env()?;
        self.shared.ensure_writable()?;
        let mut sb = self.shared.super_block.lock();
        sb.reset_password(self.shared.storage.as_ref(), old_pwd, new_pwd, Cost::new(ops_limit, mem_limit))?;
        info!("Password reset for {}", self.shared.uri);
        Ok(())
    }

    /// Whether a node exists at `path`
    pub fn path_exists(&self, path: impl AsRef<Path>) -> bool {
        self.shared.state.lock().tree.exists(path.as_ref())
    }

    /// Whether `path` is a file
    pub fn is_file(&self, path: impl AsRef<Path>) -> bool {
        self.shared.state.lock().tree.is_file(path.as_ref())
    }

    /// Whether `path` is a directory
    pub fn is_dir(&self, path: impl AsRef<Path>) -> bool {
        self.shared.state.lock().tree.is_dir(path.as_ref())
    }

    /// Create a new file and open it for writing
    ///
    /// The file starts with an empty version 1 and the repository's default
    /// version limit.
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::AlreadyExists`] if a file exists at `path`
    /// - [`StrongboxError::IsDir`] if a directory exists at `path`
    /// - [`StrongboxError::NotFound`] if the parent directory is missing
    /// - [`StrongboxError::ReadOnlyRepo`] on a read-only repository
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::io::{Read, Seek, SeekFrom, Write};
    /// use strongbox::{init_env, RepoOpener};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// init_env()?;
    /// let repo = RepoOpener::new().create(true).open("mem://create-file-doc", "pwd")?;
    /// let mut file = repo.create_file("/file")?;
    /// file.write_all(b"hello")?;
    /// file.finish()?;
    ///
    /// let mut content = String::new();
    /// file.seek(SeekFrom::Start(0))?;
    /// file.read_to_string(&mut content)?;
    /// assert_eq!(content, "hello");
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn create_file(&self, path: impl AsRef<Path>) -> Result<File> {
        OpenOptions::new().create_new(true).open(self, path)
    }

    /// Open an existing file
    ///
    /// The handle is readable, and writable unless the repository is
    /// read-only.
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<File> {
        OpenOptions::new().write(!self.shared.read_only).open(self, path)
    }

    /// Create a directory whose parent exists
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn create_dir(&self, path: impl AsRef<Path>) -> Result<()> {
        self.shared.ensure_writable()?;
        self.shared
            .apply(|_, tree| tree.create_dir(path.as_ref()).map(|_| ((), Settle::default())))?;
        debug!("Created directory");
        Ok(())
    }

    /// Create a directory and all missing ancestors
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        self.shared.ensure_writable()?;
        self.shared
            .apply(|_, tree| tree.create_dir_all(path.as_ref()).map(|_| ((), Settle::default())))?;
        debug!("Created directory tree");
        Ok(())
    }

    /// Immediate children of a directory, in creation order
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::NotFound`] if `path` does not exist
    /// - [`StrongboxError::IsFile`] if `path` is a file
    pub fn read_dir(&self, path: impl AsRef<Path>) -> Result<Vec<DirEntry>> {
        self.shared.query(|tree| tree.read_dir(path.as_ref()))
    }

    /// Metadata of the node at `path`
    pub fn metadata(&self, path: impl AsRef<Path>) -> Result<Metadata> {
        self.shared.query(|tree| tree.metadata(path.as_ref()))
    }

    /// Retained versions of a file, oldest first
    pub fn history(&self, path: impl AsRef<Path>) -> Result<Vec<Version>> {
        self.shared.query(|tree| {
            let id = tree.lookup_file(path.as_ref())?;
            Ok(tree.versions(id)?.history())
        })
    }

    /// Copy a file's current content to `to`
    ///
    /// A new destination starts its own history at version 1 with the
    /// repository's default version limit. An existing destination file
    /// receives the content as its next version. The copy shares stored
    /// blocks with the source.
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::NotFound`] if `from` is missing
    /// - [`StrongboxError::IsDir`] if `from` or `to` is a directory
    /// - [`StrongboxError::FileInUse`] if `to` has an active writer
    #[instrument(skip(self, from, to), fields(from = %from.as_ref().display(), to = %to.as_ref().display()))]
    pub fn copy(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        self.shared.ensure_writable()?;
        let limit = self.shared.version_limit;
        self.shared.apply(|writers, tree| {
            check_writers(writers, tree, to.as_ref())?;
            let effect = tree.copy_file(from.as_ref(), to.as_ref(), limit)?;
            let mut settle = Settle::releasing(effect.evicted.iter());
            settle.retain = effect.retained;
            Ok(((), settle))
        })?;
        debug!("Copied file");
        Ok(())
    }

    /// Recursively copy a directory into `to`
    #[instrument(skip(self, from, to), fields(from = %from.as_ref().display(), to = %to.as_ref().display()))]
    pub fn copy_dir_all(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        self.shared.ensure_writable()?;
        let limit = self.shared.version_limit;
        self.shared.apply(|writers, tree| {
            check_writers(writers, tree, to.as_ref())?;
            let effect = tree.copy_dir_all(from.as_ref(), to.as_ref(), limit)?;
            let mut settle = Settle::releasing(effect.evicted.iter());
            settle.retain = effect.retained;
            Ok(((), settle))
        })?;
        debug!("Copied directory tree");
        Ok(())
    }

    /// Remove a file and its whole history
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::FileInUse`] if the file has an active writer
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn remove_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.shared.ensure_writable()?;
        self.shared.apply(|writers, tree| {
            check_writers(writers, tree, path.as_ref())?;
            let node = tree.remove_file(path.as_ref())?;
            Ok(((), Settle::releasing(node.versions().into_iter().flat_map(|vm| vm.iter()))))
        })?;
        debug!("Removed file");
        Ok(())
    }

    /// Remove an empty directory
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn remove_dir(&self, path: impl AsRef<Path>) -> Result<()> {
        self.shared.ensure_writable()?;
        self.shared
            .apply(|_, tree| tree.remove_dir(path.as_ref()).map(|_| ((), Settle::default())))?;
        debug!("Removed directory");
        Ok(())
    }

    /// Remove a directory and everything below it
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn remove_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        self.shared.ensure_writable()?;
        let removed = self.shared.apply(|writers, tree| {
            check_writers(writers, tree, path.as_ref())?;
            let files = tree.remove_dir_all(path.as_ref())?;
            let settle = Settle::releasing(files.iter().filter_map(|n| n.versions()).flat_map(|vm| vm.iter()));
            Ok((files.len(), settle))
        })?;
        debug!("Removed directory tree with {} files", removed);
        Ok(())
    }

    /// Move a node to a new path
    ///
    /// Open handles follow the node to its new path.
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::NotFound`] if `from` is missing
    /// - [`StrongboxError::AlreadyExists`] if `to` is occupied
    /// - [`StrongboxError::InvalidInput`] if `to` is inside `from`
    /// - [`StrongboxError::IsRoot`] if `from` is the root
    #[instrument(skip(self, from, to), fields(from = %from.as_ref().display(), to = %to.as_ref().display()))]
    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        self.shared.ensure_writable()?;
        self.shared
            .apply(|_, tree| tree.rename(from.as_ref(), to.as_ref()).map(|_| ((), Settle::default())))?;
        debug!("Renamed");
        Ok(())
    }

    /// Close the repository, releasing the backend lock
    ///
    /// Dropping a `Repo` does the same, but only `close` reports failures.
    pub fn close(self) -> Result<()> {
        self.shared.close()
    }
}

impl Drop for Repo {
    fn drop(&mut self) {
        if let Err(e) = self.shared.close() {
            warn!("Failed to close repository {}: {}", self.shared.uri, e);
        }
    }
}

/// Fail if any node at or below `path` has an active writer
fn check_writers(writers: &HashSet<NodeId>, tree: &DirTree, path: &Path) -> Result<()> {
    if writers.is_empty() {
        return Ok(());
    }
    let ids = match tree.subtree_ids(path) {
        Ok(ids) => ids,
        Err(StrongboxError::NotFound(_)) => return Ok(()),
        Err(e) => return Err(e),
    };
    if ids.iter().any(|id| writers.contains(id)) {
        return Err(StrongboxError::FileInUse(path.display().to_string()));
    }
    Ok(())
}
