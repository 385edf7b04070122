//! Encrypted block store
//!
//! ## Overview
//!
//! File content is cut into blocks of at most 64 KiB. By default the cuts
//! fall on a fixed 64 KiB grid; a repository created with `dedup_chunk`
//! instead cuts where a rolling hash of the content says so (FastCDC), which
//! keeps later blocks shareable after an insertion. Each block is addressed
//! by a keyed BLAKE3 hash of its plaintext, so identical blocks within one
//! repository are stored once. A stored block is
//!
//! ```text
//! seal(block_key, compress(plain), aad = content id)
//! ```
//!
//! and reading it back checks the tag, the length recorded in the
//! referencing [`BlockRef`], and the content id itself.
//!
//! ## Lifetime of a block
//!
//! The store keeps two counters per block, both in memory:
//!
//! - **refs**: how many retained versions reference the block. Rebuilt from
//!   the directory tree each time a repository is opened.
//! - **pins**: how many live readers or uncommitted writes rely on it.
//!
//! A block is deleted from the backend once both counters reach zero. Pins
//! are what let a [`ContentReader`] keep reading a version after it has been
//! evicted, and what protect freshly written blocks until the version that
//! uses them is committed.
//!
//! ## Provisional content
//!
//! A [`Draft`] is the working copy of a file between its first write and
//! `finish`. It starts as a copy-on-write view of the current version and
//! only materializes the blocks that are written. At commit, untouched
//! blocks are shared with the previous version, runs of zeros past the old
//! end share one stored zero block, and new blocks are sealed and stored in
//! bounded batches.

use crate::compression::CompressionEngine;
use crate::crypto::{keyed_hash, Crypto, Key};
use crate::error::{Result, StrongboxError};
use crate::storage::Storage;
use crate::types::ContentId;
use crate::utils::format_bytes;
use fastcdc::v2020::StreamCDC;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Size of a full block in bytes
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Largest supported file length (1 TiB)
pub const MAX_FILE_LEN: u64 = 1 << 40;

/// New blocks sealed and stored together during a commit
const COMMIT_BATCH: usize = 64;

// Content-defined chunk bounds; the maximum keeps chunks within a block
const CHUNK_MIN: u32 = 16 * 1024;
const CHUNK_AVG: u32 = 32 * 1024;
const CHUNK_MAX: u32 = BLOCK_SIZE as u32;

/// End of a write of `len` bytes at `pos`
///
/// # Errors
///
/// - [`StrongboxError::InvalidInput`] if the write would end past
///   [`MAX_FILE_LEN`]
pub(crate) fn write_end(pos: u64, len: usize) -> Result<u64> {
    pos.checked_add(len as u64)
        .filter(|&end| end <= MAX_FILE_LEN)
        .ok_or_else(too_large)
}

fn too_large() -> StrongboxError {
    StrongboxError::invalid_input(format!("file length would exceed {}", format_bytes(MAX_FILE_LEN)))
}

/// Reference from a version to one stored block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    /// Content id of the block
    pub id: ContentId,
    /// Plaintext length
    pub len: u32,
}

#[derive(Debug, Default)]
struct RefTable {
    refs: HashMap<ContentId, u64>,
    pins: HashMap<ContentId, u64>,
}

impl RefTable {
    fn is_live(&self, id: &ContentId) -> bool {
        self.refs.contains_key(id) || self.pins.contains_key(id)
    }
}

fn decrement(map: &mut HashMap<ContentId, u64>, id: &ContentId) {
    if let Some(count) = map.get_mut(id) {
        *count -= 1;
        if *count == 0 {
            map.remove(id);
        }
    }
}

/// Where one block of the version being committed comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    /// An existing block shared with the base version
    Reuse(BlockRef),
    /// All zeros, this many bytes
    Zero(u32),
    /// Assembled from dirty and base bytes of the draft
    Assemble,
}

/// Block store shared by every handle of a repository
pub(crate) struct ContentStore {
    storage: Arc<dyn Storage>,
    crypto: Crypto,
    block_key: Key,
    id_key: Key,
    index_key: Key,
    compression: CompressionEngine,
    dedup_chunk: bool,
    table: Mutex<RefTable>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("ContentStore")
            .field("storage", &self.storage)
            .field("cipher", &self.crypto.cipher())
            .field("dedup_chunk", &self.dedup_chunk)
            .field("referenced", &table.refs.len())
            .field("pinned", &table.pins.len())
            .finish()
    }
}

impl ContentStore {
    /// Create a store whose keys are derived from the repository master key
    ///
    /// `dedup_chunk` selects content-defined block boundaries instead of the
    /// fixed grid.
    pub fn new(
        storage: Arc<dyn Storage>,
        crypto: Crypto,
        master_key: &Key,
        compression: CompressionEngine,
        dedup_chunk: bool,
    ) -> Result<Self> {
        Ok(Self {
            storage,
            crypto,
            block_key: master_key.derive_subkey(b"block")?,
            id_key: master_key.derive_subkey(b"content-id")?,
            index_key: master_key.derive_subkey(b"index")?,
            compression,
            dedup_chunk,
            table: Mutex::new(RefTable::default()),
            closed: AtomicBool::new(false),
        })
    }

    /// Refuse further block I/O
    ///
    /// Returns `false` if the store was already closed.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StrongboxError::RepoClosed);
        }
        Ok(())
    }

    pub fn content_id(&self, plain: &[u8]) -> ContentId {
        ContentId::from_bytes(keyed_hash(&self.id_key, plain))
    }

    /// Compress and seal a metadata record such as the directory index
    pub fn seal_record(&self, label: &[u8], plain: &[u8]) -> Result<Vec<u8>> {
        let packed = self.compression.compress(plain)?;
        self.crypto.encrypt_block(&self.index_key, &packed, label)
    }

    /// Reverse of [`ContentStore::seal_record`]
    pub fn open_record(&self, label: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
        let packed = self.crypto.decrypt_block(&self.index_key, sealed, label)?;
        self.compression.decompress(&packed)
    }

    /// Read and verify one block
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::CorruptedData`] if the block is missing from the
    ///   backend, fails authentication, or does not match its reference
    /// - [`StrongboxError::RepoClosed`] after the repository is closed
    pub fn load_block(&self, block: &BlockRef) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let sealed = self.storage.get(&block.id).map_err(|e| match e {
            StrongboxError::NotFound(_) => StrongboxError::corrupted(format!("missing block {}", block.id)),
            other => other,
        })?;

        let packed = self.crypto.decrypt_block(&self.block_key, &sealed, block.id.as_bytes())?;
        let plain = self.compression.decompress(&packed)?;
        if plain.len() != block.len as usize || self.content_id(&plain) != block.id {
            return Err(StrongboxError::corrupted(format!("block {} does not match its reference", block.id)));
        }
        trace!("Loaded block {} ({} bytes)", block.id, plain.len());
        Ok(plain)
    }

    fn seal_block(&self, id: &ContentId, plain: &[u8]) -> Result<Vec<u8>> {
        let packed = self.compression.compress(plain)?;
        self.crypto.encrypt_block(&self.block_key, &packed, id.as_bytes())
    }

    /// Store new blocks and pin them
    ///
    /// Blocks already known to the store are neither sealed nor written
    /// again. Every returned block is pinned once and must be unpinned by
    /// the caller after the referencing version is committed or abandoned.
    pub fn store_blocks(&self, blocks: Vec<Vec<u8>>) -> Result<Vec<BlockRef>> {
        self.ensure_open()?;
        let total: usize = blocks.iter().map(Vec::len).sum();

        // Hashing, compression and encryption run in parallel outside the lock
        let ids: Vec<ContentId> = blocks.par_iter().map(|plain| self.content_id(plain)).collect();
        let known: Vec<bool> = {
            let table = self.table.lock();
            ids.iter().map(|id| table.is_live(id)).collect()
        };
        let sealed = blocks
            .par_iter()
            .zip(ids.par_iter())
            .zip(known.par_iter())
            .map(|((plain, id), &known)| if known { Ok(None) } else { self.seal_block(id, plain).map(Some) })
            .collect::<Result<Vec<_>>>()?;

        let mut table = self.table.lock();
        let mut stored = Vec::with_capacity(blocks.len());
        let mut written = 0usize;
        for ((plain, id), data) in blocks.iter().zip(&ids).zip(sealed) {
            if !table.is_live(id) {
                let put = match data {
                    Some(data) => Ok(data),
                    // Collected since the check above
                    None => self.seal_block(id, plain),
                }
                .and_then(|data| self.storage.put(id, &data));
                if let Err(e) = put {
                    for done in &stored {
                        self.unpin_locked(&mut table, done);
                    }
                    return Err(e);
                }
                written += 1;
            }
            *table.pins.entry(*id).or_insert(0) += 1;
            stored.push(BlockRef {
                id: *id,
                len: plain.len() as u32,
            });
        }
        drop(table);

        debug!(
            "Stored {} blocks ({}), {} new",
            stored.len(),
            format_bytes(total as u64),
            written
        );
        Ok(stored)
    }

    /// Store the content of a draft as the block list of a new version
    ///
    /// # Returns
    ///
    /// The full block list of the version and the blocks pinned on its
    /// behalf. The caller unpins those once the version is committed or
    /// abandoned; on error nothing stays pinned.
    pub fn commit_draft(&self, draft: &mut Draft) -> Result<(Vec<BlockRef>, Vec<BlockRef>)> {
        self.ensure_open()?;
        let mut assembly = Assembly::new(self);
        if self.dedup_chunk {
            self.chunk_draft(draft, &mut assembly)?;
        } else {
            for idx in 0..draft.block_count() {
                match draft.slot(idx) {
                    Slot::Reuse(block) => assembly.push_shared(block),
                    Slot::Zero(len) => assembly.push_zero(len)?,
                    Slot::Assemble => assembly.push_new(draft.assemble_block(idx)?)?,
                }
            }
        }
        assembly.finish()
    }

    /// Cut the whole draft at content-defined boundaries
    fn chunk_draft(&self, draft: &mut Draft, assembly: &mut Assembly<'_>) -> Result<()> {
        let mut source = DraftSource {
            draft,
            pos: 0,
            failure: None,
        };
        let mut failed = None;
        for chunk in StreamCDC::new(&mut source, CHUNK_MIN, CHUNK_AVG, CHUNK_MAX) {
            match chunk {
                Ok(chunk) => assembly.push_new(chunk.data)?,
                Err(e) => {
                    failed = Some(e);
                    break;
                }
            }
        }

        match failed {
            None => Ok(()),
            Some(e) => Err(source
                .failure
                .take()
                .unwrap_or_else(|| StrongboxError::internal(format!("chunking failed: {:?}", e)))),
        }
    }

    pub fn pin(&self, blocks: &[BlockRef]) {
        let mut table = self.table.lock();
        for block in blocks {
            *table.pins.entry(block.id).or_insert(0) += 1;
        }
    }

    pub fn unpin(&self, blocks: &[BlockRef]) {
        let mut table = self.table.lock();
        for block in blocks {
            self.unpin_locked(&mut table, block);
        }
    }

    /// Count references from a committed version
    pub fn retain(&self, blocks: &[BlockRef]) {
        let mut table = self.table.lock();
        for block in blocks {
            *table.refs.entry(block.id).or_insert(0) += 1;
        }
    }

    /// Drop references from an evicted or removed version
    pub fn release(&self, blocks: &[BlockRef]) {
        let mut table = self.table.lock();
        for block in blocks {
            decrement(&mut table.refs, &block.id);
            self.collect_locked(&table, &block.id);
        }
    }

    /// Replace all reference counts, used when a repository is opened
    pub fn reset_refs<'a>(&self, blocks: impl Iterator<Item = &'a BlockRef>) {
        let mut refs = HashMap::new();
        for block in blocks {
            *refs.entry(block.id).or_insert(0u64) += 1;
        }
        debug!("Rebuilt reference counts for {} blocks", refs.len());
        self.table.lock().refs = refs;
    }

    /// Number of distinct blocks pinned by readers or uncommitted writes
    pub fn pinned_blocks(&self) -> usize {
        self.table.lock().pins.len()
    }

    /// Number of distinct blocks referenced by retained versions
    pub fn referenced_blocks(&self) -> usize {
        self.table.lock().refs.len()
    }

    fn unpin_locked(&self, table: &mut RefTable, block: &BlockRef) {
        decrement(&mut table.pins, &block.id);
        self.collect_locked(table, &block.id);
    }

    fn collect_locked(&self, table: &RefTable, id: &ContentId) {
        // Once closed, another instance may own the backend
        if table.is_live(id) || self.closed.load(Ordering::Acquire) {
            return;
        }
        match self.storage.delete(id) {
            Ok(()) => trace!("Deleted unreferenced block {}", id),
            Err(e) => warn!("Failed to delete unreferenced block {}: {}", id, e),
        }
    }
}

/// Block list of a version under construction
///
/// New plaintext is queued and stored [`COMMIT_BATCH`] blocks at a time.
/// Every block stored or pinned on the version's behalf is unpinned on drop
/// unless [`Assembly::finish`] handed it to the caller.
struct Assembly<'a> {
    store: &'a ContentStore,
    layout: Vec<Option<BlockRef>>,
    queued: Vec<(usize, Vec<u8>)>,
    pinned: Vec<BlockRef>,
    zeros: HashMap<u32, BlockRef>,
}

impl<'a> Assembly<'a> {
    fn new(store: &'a ContentStore) -> Self {
        Self {
            store,
            layout: Vec::new(),
            queued: Vec::with_capacity(COMMIT_BATCH),
            pinned: Vec::new(),
            zeros: HashMap::new(),
        }
    }

    fn push_shared(&mut self, block: BlockRef) {
        self.layout.push(Some(block));
    }

    /// Zero blocks of one length are stored once and pinned per use
    fn push_zero(&mut self, len: u32) -> Result<()> {
        let block = match self.zeros.get(&len) {
            Some(&block) => {
                self.store.pin(&[block]);
                block
            }
            None => {
                let block = self
                    .store
                    .store_blocks(vec![vec![0u8; len as usize]])?
                    .pop()
                    .ok_or_else(|| StrongboxError::internal("zero block not stored"))?;
                self.zeros.insert(len, block);
                block
            }
        };
        self.pinned.push(block);
        self.layout.push(Some(block));
        Ok(())
    }

    fn push_new(&mut self, data: Vec<u8>) -> Result<()> {
        self.queued.push((self.layout.len(), data));
        self.layout.push(None);
        if self.queued.len() >= COMMIT_BATCH {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.queued.is_empty() {
            return Ok(());
        }
        let (slots, data): (Vec<usize>, Vec<Vec<u8>>) = self.queued.drain(..).unzip();
        let stored = self.store.store_blocks(data)?;
        for (slot, block) in slots.into_iter().zip(&stored) {
            self.layout[slot] = Some(*block);
        }
        self.pinned.extend(stored);
        Ok(())
    }

    fn finish(mut self) -> Result<(Vec<BlockRef>, Vec<BlockRef>)> {
        self.flush()?;
        let blocks = self
            .layout
            .iter()
            .copied()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| StrongboxError::internal("block slot left empty"))?;
        let pinned = std::mem::take(&mut self.pinned);
        trace!("Assembled {} blocks, {} pinned", blocks.len(), pinned.len());
        Ok((blocks, pinned))
    }
}

impl Drop for Assembly<'_> {
    fn drop(&mut self) {
        if !self.pinned.is_empty() {
            self.store.unpin(&self.pinned);
        }
    }
}

/// Sequential [`io::Read`] over a draft, fed to the chunker
struct DraftSource<'a> {
    draft: &'a mut Draft,
    pos: u64,
    failure: Option<StrongboxError>,
}

impl io::Read for DraftSource<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.draft.read_at(self.pos, buf) {
            Ok(n) => {
                self.pos += n as u64;
                Ok(n)
            }
            Err(e) => {
                let err = io::Error::other(e.to_string());
                self.failure = Some(e);
                Err(err)
            }
        }
    }
}

/// Pinned, read-only view of a block list
pub(crate) struct ContentReader {
    store: Arc<ContentStore>,
    blocks: Vec<BlockRef>,
    starts: Vec<u64>,
    len: u64,
    cache: Option<(usize, Vec<u8>)>,
}

impl std::fmt::Debug for ContentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentReader")
            .field("blocks", &self.blocks.len())
            .field("len", &self.len)
            .finish()
    }
}

impl ContentReader {
    pub fn new(store: Arc<ContentStore>, blocks: Vec<BlockRef>) -> Self {
        store.pin(&blocks);
        let mut starts = Vec::with_capacity(blocks.len());
        let mut len = 0u64;
        for block in &blocks {
            starts.push(len);
            len += block.len as u64;
        }
        Self {
            store,
            blocks,
            starts,
            len,
            cache: None,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// The block starting exactly at `offset`, if any
    pub fn block_starting_at(&self, offset: u64) -> Option<BlockRef> {
        self.starts
            .binary_search(&offset)
            .ok()
            .map(|idx| self.blocks[idx])
    }

    fn block(&mut self, idx: usize) -> Result<&[u8]> {
        let cached = matches!(&self.cache, Some((i, _)) if *i == idx);
        if !cached {
            let data = self.store.load_block(&self.blocks[idx])?;
            self.cache = Some((idx, data));
        }
        match &self.cache {
            Some((_, data)) => Ok(data.as_slice()),
            None => Err(StrongboxError::internal("block cache empty")),
        }
    }

    /// Read from `pos` until `buf` is full or the content ends
    pub fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        self.store.ensure_open()?;
        let mut done = 0usize;
        while done < buf.len() {
            let at = pos + done as u64;
            if at >= self.len {
                break;
            }
            let idx = self.starts.partition_point(|&s| s <= at) - 1;
            let off = (at - self.starts[idx]) as usize;
            let data = self.block(idx)?;
            let n = (data.len() - off).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&data[off..off + n]);
            done += n;
        }
        Ok(done)
    }
}

impl Drop for ContentReader {
    fn drop(&mut self) {
        self.store.unpin(&self.blocks);
    }
}

/// Provisional content of a file with uncommitted writes
///
/// Laid out on a fixed grid of [`BLOCK_SIZE`] blocks. Bytes come from, in
/// order: a dirty block, the base version (below `base_valid`), or zeros.
#[derive(Debug)]
pub(crate) struct Draft {
    base: ContentReader,
    base_valid: u64,
    dirty: BTreeMap<u64, Vec<u8>>,
    len: u64,
}

impl Draft {
    /// Copy-on-write view of `base`
    pub fn new(base: ContentReader) -> Self {
        let len = base.len();
        Self {
            base,
            base_valid: len,
            dirty: BTreeMap::new(),
            len,
        }
    }

    /// Empty content that keeps `base` pinned until commit
    pub fn truncated(base: ContentReader) -> Self {
        Self {
            base,
            base_valid: 0,
            dirty: BTreeMap::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    fn block_len(&self, idx: u64) -> usize {
        let start = idx * BLOCK_SIZE as u64;
        self.len.saturating_sub(start).min(BLOCK_SIZE as u64) as usize
    }

    /// Fill `out` with the bytes of block `idx` starting at `off`
    fn read_block_range(&mut self, idx: u64, off: usize, out: &mut [u8]) -> Result<()> {
        out.fill(0);
        if let Some(block) = self.dirty.get(&idx) {
            if off < block.len() {
                let n = (block.len() - off).min(out.len());
                out[..n].copy_from_slice(&block[off..off + n]);
            }
            return Ok(());
        }

        let start = idx * BLOCK_SIZE as u64 + off as u64;
        if start < self.base_valid {
            let n = ((self.base_valid - start) as usize).min(out.len());
            self.base.read_at(start, &mut out[..n])?;
        }
        Ok(())
    }

    pub fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        if pos >= self.len {
            return Ok(0);
        }
        let total = ((self.len - pos) as usize).min(buf.len());
        let mut done = 0usize;
        while done < total {
            let at = pos + done as u64;
            let idx = at / BLOCK_SIZE as u64;
            let off = (at % BLOCK_SIZE as u64) as usize;
            let n = (BLOCK_SIZE - off).min(total - done);
            self.read_block_range(idx, off, &mut buf[done..done + n])?;
            done += n;
        }
        Ok(done)
    }

    /// Write `data` at `pos`, zero-filling any gap after the current end
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::InvalidInput`] if the write would end past
    ///   [`MAX_FILE_LEN`]; nothing is written
    pub fn write_at(&mut self, pos: u64, data: &[u8]) -> Result<usize> {
        let end = write_end(pos, data.len())?;
        let mut done = 0usize;
        while done < data.len() {
            let at = pos + done as u64;
            let idx = at / BLOCK_SIZE as u64;
            let off = (at % BLOCK_SIZE as u64) as usize;
            let n = (BLOCK_SIZE - off).min(data.len() - done);

            let mut block = match self.dirty.remove(&idx) {
                Some(block) => block,
                None => {
                    let mut block = vec![0u8; self.block_len(idx)];
                    self.read_block_range(idx, 0, &mut block)?;
                    block
                }
            };
            if block.len() < off + n {
                block.resize(off + n, 0);
            }
            block[off..off + n].copy_from_slice(&data[done..done + n]);
            self.dirty.insert(idx, block);
            done += n;
        }
        self.len = self.len.max(end);
        Ok(done)
    }

    /// Truncate or zero-extend to exactly `new_len` bytes
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::InvalidInput`] if `new_len` exceeds [`MAX_FILE_LEN`]
    pub fn set_len(&mut self, new_len: u64) -> Result<()> {
        if new_len > MAX_FILE_LEN {
            return Err(too_large());
        }
        if new_len < self.len {
            let keep_blocks = new_len.div_ceil(BLOCK_SIZE as u64);
            drop(self.dirty.split_off(&keep_blocks));
            if new_len % BLOCK_SIZE as u64 != 0 {
                let last = new_len / BLOCK_SIZE as u64;
                if let Some(block) = self.dirty.get_mut(&last) {
                    block.truncate((new_len % BLOCK_SIZE as u64) as usize);
                }
            }
            self.base_valid = self.base_valid.min(new_len);
        }
        self.len = new_len;
        Ok(())
    }

    /// Number of blocks on the fixed grid
    pub fn block_count(&self) -> u64 {
        self.len.div_ceil(BLOCK_SIZE as u64)
    }

    /// Where block `idx` of the fixed grid comes from at commit
    pub fn slot(&self, idx: u64) -> Slot {
        let start = idx * BLOCK_SIZE as u64;
        let want = self.block_len(idx);
        if self.dirty.contains_key(&idx) {
            return Slot::Assemble;
        }
        if start >= self.base_valid {
            return Slot::Zero(want as u32);
        }
        self.base
            .block_starting_at(start)
            .filter(|b| b.len as usize == want && start + want as u64 <= self.base_valid)
            .map_or(Slot::Assemble, Slot::Reuse)
    }

    /// Materialize block `idx` of the fixed grid
    pub fn assemble_block(&mut self, idx: u64) -> Result<Vec<u8>> {
        let mut data = vec![0u8; self.block_len(idx)];
        self.read_block_range(idx, 0, &mut data)?;
        Ok(data)
    }
}
