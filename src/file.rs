//! File handles and version readers
//!
//! ## Writing
//!
//! A [`File`] reads and writes the current version of one file through the
//! standard [`Read`], [`Write`] and [`Seek`] traits. The first mutating call
//! makes the handle the file's single writer and starts a provisional
//! version; further writes extend it without creating intermediate versions.
//! [`File::finish`] commits it as the next version, evicting the oldest one
//! past the file's version limit, and resets the cursor to 0.
//!
//! ```rust
//! use std::io::{Read, Seek, SeekFrom, Write};
//! use strongbox::{init_env, RepoOpener};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! init_env()?;
//! let repo = RepoOpener::new()
//!     .create(true)
//!     .version_limit(4)
//!     .open("mem://file-module-doc", "pwd")?;
//!
//! let mut file = repo.create_file("/notes")?;
//! file.write_all(b"first")?;
//! file.finish()?;
//! file.write_once(b"second")?;
//! assert_eq!(file.curr_version()?, 3);
//!
//! // Earlier versions stay readable
//! let mut old = String::new();
//! file.version_reader(2)?.read_to_string(&mut old)?;
//! assert_eq!(old, "first");
//! # Ok(())
//! # }
//! ```
//!
//! ## Reading
//!
//! A handle without pending writes reads the file's committed current
//! version, following new versions committed by other handles. A handle
//! with pending writes reads its own provisional content.
//! [`VersionReader`] is pinned to one committed version and never changes,
//! even after that version is evicted from the history.

use crate::content::{write_end, ContentReader, Draft};
use crate::error::{from_io, Result, StrongboxError};
use crate::repo::{Repo, RepoShared};
use crate::tree::NodeId;
use crate::types::Metadata;
use crate::version::{validate_limit, Version};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

fn seek_target(current: u64, len: u64, pos: SeekFrom) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(p) => Some(p),
        SeekFrom::End(delta) => len.checked_add_signed(delta),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
    };
    target.ok_or_else(|| StrongboxError::invalid_input("seek to a negative position"))
}

/// Options for opening a file
///
/// # Examples
///
/// ```rust
/// use std::io::Write;
/// use strongbox::{init_env, OpenOptions, RepoOpener};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// init_env()?;
/// let repo = RepoOpener::new().create(true).open("mem://open-options-doc", "pwd")?;
/// let mut log = OpenOptions::new()
///     .create(true)
///     .append(true)
///     .version_limit(8)
///     .open(&repo, "/log")?;
/// log.write_all(b"line\n")?;
/// log.finish()?;
/// # Ok(())
/// # }
/// ```
///
/// # Default Values
///
/// - `read`: true
/// - everything else: false
/// - `version_limit`: the repository default
#[derive(Debug, Clone)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    append: bool,
    truncate: bool,
    create: bool,
    create_new: bool,
    version_limit: Option<u8>,
}

impl OpenOptions {
    /// Options for a read-only handle
    pub fn new() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            truncate: false,
            create: false,
            create_new: false,
            version_limit: None,
        }
    }

    /// Allow reading
    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    /// Allow writing
    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    /// Write at the end of the content regardless of the cursor
    ///
    /// Implies `write`.
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Start from empty content
    ///
    /// The truncation is provisional until [`File::finish`]. Implies `write`.
    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Create the file if it does not exist
    ///
    /// Implies `write`.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Always create the file, failing if it exists
    ///
    /// Implies `create`.
    pub fn create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        self
    }

    /// Versions kept for a file created by this call, at least 1
    ///
    /// Ignored when the file already exists.
    pub fn version_limit(mut self, limit: u8) -> Self {
        self.version_limit = Some(limit);
        self
    }

    fn wants_write(&self) -> bool {
        self.write || self.append || self.truncate || self.create || self.create_new
    }

    /// Open the file at `path` in `repo`
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::ReadOnlyRepo`] if any write flag is set on a
    ///   read-only repository
    /// - [`StrongboxError::InvalidInput`] for a version limit of 0
    /// - [`StrongboxError::NotFound`] if the file is missing and neither
    ///   `create` nor `create_new` is set
    /// - [`StrongboxError::AlreadyExists`] if the file exists and
    ///   `create_new` is set
    /// - [`StrongboxError::IsDir`] if `path` is a directory
    /// - [`StrongboxError::FileInUse`] for `truncate` while another handle
    ///   is writing
    pub fn open(self, repo: &Repo, path: impl AsRef<Path>) -> Result<File> {
        let path = path.as_ref();
        let shared = repo.shared();
        shared.ensure_open()?;

        let writable = self.wants_write();
        if writable && shared.is_read_only() {
            return Err(StrongboxError::ReadOnlyRepo);
        }
        if let Some(limit) = self.version_limit {
            validate_limit(limit)?;
        }

        let node = shared.resolve_file(path, self.create, self.create_new, self.version_limit)?;
        let mut file = File {
            repo: shared.clone(),
            node,
            path: path.to_path_buf(),
            pos: 0,
            readable: self.read,
            writable,
            append: self.append,
            draft: None,
            reader: None,
        };
        if self.truncate {
            file.start_draft(true)?;
        }
        Ok(file)
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a file in a repository
///
/// Uncommitted writes are discarded when the handle is closed or dropped.
pub struct File {
    repo: Arc<RepoShared>,
    node: NodeId,
    path: PathBuf,
    pos: u64,
    readable: bool,
    writable: bool,
    append: bool,
    draft: Option<Draft>,
    reader: Option<(u64, ContentReader)>,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path)
            .field("pos", &self.pos)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("dirty", &self.draft.is_some())
            .finish()
    }
}

impl File {
    /// Whether the handle has uncommitted writes
    pub fn is_dirty(&self) -> bool {
        self.draft.is_some()
    }

    /// Metadata of the committed current version
    ///
    /// Pending writes are not reflected until [`File::finish`].
    pub fn metadata(&self) -> Result<Metadata> {
        self.repo.metadata_of(self.node)
    }

    /// Retained versions, oldest first
    pub fn history(&self) -> Result<Vec<Version>> {
        self.repo.history_of(self.node)
    }

    /// Number of the current version
    pub fn curr_version(&self) -> Result<u64> {
        Ok(self.repo.current_of(self.node)?.0)
    }

    /// Open a reader pinned to one retained version
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::VersionNotFound`] if the version was evicted or
    ///   never existed
    pub fn version_reader(&self, version: u64) -> Result<VersionReader> {
        let (num, reader) = self.repo.open_reader(self.node, Some(version))?;
        Ok(VersionReader { num, reader, pos: 0 })
    }

    /// Commit pending writes as the next version
    ///
    /// Resets the cursor to 0. Does nothing when no writes are pending. On
    /// failure the pending writes are kept and the current version does not
    /// change.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn finish(&mut self) -> Result<()> {
        self.repo.ensure_open()?;
        let Some(mut draft) = self.draft.take() else {
            return Ok(());
        };

        match self.repo.commit_draft(self.node, &mut draft) {
            Ok(version) => {
                self.repo.release_writer(self.node);
                self.pos = 0;
                self.reader = None;
                debug!("Finished version {}", version.num());
                Ok(())
            }
            Err(e) => {
                self.draft = Some(draft);
                Err(e)
            }
        }
    }

    /// Write `buf` at the cursor and commit it as the next version
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::NotFinished`] if writes are already pending
    pub fn write_once(&mut self, buf: &[u8]) -> Result<()> {
        if self.draft.is_some() {
            return Err(StrongboxError::NotFinished);
        }
        self.write_at_cursor(buf)?;
        self.finish()
    }

    /// Truncate or zero-extend the pending content to `len` bytes
    ///
    /// Like a write, this needs [`File::finish`] to take effect. The cursor
    /// does not move.
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::InvalidInput`] if `len` exceeds
    ///   [`MAX_FILE_LEN`](crate::MAX_FILE_LEN)
    pub fn set_len(&mut self, len: u64) -> Result<()> {
        self.start_draft(false)?.set_len(len)
    }

    /// Read the rest of the content from the cursor
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf).map_err(from_io)?;
        Ok(buf)
    }

    /// Close the handle, discarding pending writes
    pub fn close(self) {}

    fn start_draft(&mut self, truncate: bool) -> Result<&mut Draft> {
        self.repo.ensure_writable()?;
        if !self.writable {
            return Err(StrongboxError::invalid_input("file not opened for writing"));
        }

        if self.draft.is_none() {
            self.repo.claim_writer(self.node, &self.path)?;
            let base = match self.repo.open_reader(self.node, None) {
                Ok((_, base)) => base,
                Err(e) => {
                    self.repo.release_writer(self.node);
                    return Err(e);
                }
            };
            self.draft = Some(if truncate { Draft::truncated(base) } else { Draft::new(base) });
        }
        self.draft
            .as_mut()
            .ok_or_else(|| StrongboxError::internal("draft missing after start"))
    }

    fn write_at_cursor(&mut self, buf: &[u8]) -> Result<usize> {
        let pos = self.pos;
        let append = self.append;
        if !append {
            // Checked before a draft is started for nothing
            write_end(pos, buf.len())?;
        }
        let draft = self.start_draft(false)?;
        let at = if append { draft.len() } else { pos };
        let written = draft.write_at(at, buf)?;
        self.pos = write_end(at, written)?;
        Ok(written)
    }

    /// Reader over the committed current version, refreshed when it changes
    fn committed(&mut self) -> Result<&mut ContentReader> {
        let (current, _) = self.repo.current_of(self.node)?;
        let stale = !matches!(&self.reader, Some((num, _)) if *num == current);
        if stale {
            self.reader = Some(self.repo.open_reader(self.node, None)?);
        }
        match &mut self.reader {
            Some((_, reader)) => Ok(reader),
            None => Err(StrongboxError::internal("reader missing after refresh")),
        }
    }

    fn read_at_cursor(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.repo.ensure_open()?;
        if !self.readable {
            return Err(StrongboxError::invalid_input("file not opened for reading"));
        }
        let pos = self.pos;
        let read = match self.draft.as_mut() {
            Some(draft) => draft.read_at(pos, buf)?,
            None => self.committed()?.read_at(pos, buf)?,
        };
        self.pos += read as u64;
        Ok(read)
    }

    fn seek_cursor(&mut self, pos: SeekFrom) -> Result<u64> {
        self.repo.ensure_open()?;
        let len = match &self.draft {
            Some(draft) => draft.len(),
            None => self.repo.current_of(self.node)?.1,
        };
        self.pos = seek_target(self.pos, len, pos)?;
        Ok(self.pos)
    }
}

impl Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_at_cursor(buf)?)
    }
}

impl Write for File {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_at_cursor(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Content becomes durable through `finish`
        Ok(())
    }
}

impl Seek for File {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_cursor(pos)?)
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.draft.take().is_some() {
            self.repo.release_writer(self.node);
            debug!("Discarded pending writes to {:?}", self.path);
        }
    }
}

/// Read-only cursor over one committed version
///
/// The version's blocks stay readable for the reader's lifetime, even if the
/// version is evicted or the file removed in the meantime.
#[derive(Debug)]
pub struct VersionReader {
    num: u64,
    reader: ContentReader,
    pos: u64,
}

impl VersionReader {
    /// Version number this reader is bound to
    pub fn version(&self) -> u64 {
        self.num
    }

    /// Content length of the version
    pub fn len(&self) -> u64 {
        self.reader.len()
    }

    /// Whether the version is empty
    pub fn is_empty(&self) -> bool {
        self.reader.len() == 0
    }
}

impl Read for VersionReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.reader.read_at(self.pos, buf)?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for VersionReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = seek_target(self.pos, self.reader.len(), pos)?;
        Ok(self.pos)
    }
}
