//! LZ4 compression for blocks and index records
//!
//! Compression runs before encryption, on plaintext, because ciphertext does
//! not compress. Whether anything is compressed is a repository option
//! chosen at creation, and it covers blocks and the directory index alike.
//!
//! ## Format
//!
//! Every buffer produced by [`CompressionEngine::compress`] starts with a
//! 4-byte header:
//! - `LZ4S` (0x4C5A3453): LZ4 data with a prepended size follows
//! - `\0\0\0\0`: the original bytes follow unchanged
//!
//! Compression is skipped when it does not make the buffer smaller, so
//! incompressible blocks cost only the header.
//!
//! ## Examples
//!
//! ```rust
//! use strongbox::compression::{CompressionEngine, CompressionStrategy};
//!
//! let engine = CompressionEngine::new(CompressionStrategy::Fast);
//! let data = b"all work and no play ".repeat(100);
//! let packed = engine.compress(&data)?;
//! assert!(packed.len() < data.len());
//! assert_eq!(engine.decompress(&packed)?, data);
//! # Ok::<(), strongbox::StrongboxError>(())
//! ```

use crate::error::{Result, StrongboxError};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use parking_lot::Mutex;
use std::time::Instant;
use tracing::trace;

// Magic bytes to identify LZ4 compressed data
const LZ4_MAGIC: &[u8] = b"LZ4S";
const RAW_MAGIC: &[u8] = &[0, 0, 0, 0];

/// Buffers shorter than this are never worth compressing
const MIN_COMPRESS_SIZE: usize = 64;

/// When buffers are compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionStrategy {
    /// Store everything raw behind the raw header
    #[default]
    None,
    /// LZ4 for every buffer that shrinks
    Fast,
}

impl CompressionStrategy {
    /// Strategy matching the repository `compress` flag
    pub fn from_flag(compress: bool) -> Self {
        if compress {
            CompressionStrategy::Fast
        } else {
            CompressionStrategy::None
        }
    }
}

/// Compression statistics for monitoring
#[derive(Debug, Default, Clone)]
pub struct CompressionStats {
    /// Number of buffers compressed
    pub buffers_compressed: usize,
    /// Number of buffers stored raw
    pub buffers_stored_raw: usize,
    /// Total bytes saved by compression
    pub bytes_saved: usize,
    /// Total compression time in microseconds
    pub compression_time_us: u64,
}

impl CompressionStats {
    /// Share of buffers that were compressed, from 0.0 to 1.0
    pub fn compression_ratio(&self) -> f64 {
        let total = self.buffers_compressed + self.buffers_stored_raw;
        if total == 0 {
            return 0.0;
        }
        self.buffers_compressed as f64 / total as f64
    }
}

/// Compression engine shared by the content store and the index writer
///
/// # Thread Safety
///
/// The engine is `Sync`; statistics sit behind a mutex that is held only to
/// bump counters.
#[derive(Debug)]
pub struct CompressionEngine {
    strategy: CompressionStrategy,
    stats: Mutex<CompressionStats>,
}

impl CompressionEngine {
    /// Create a new compression engine with the specified strategy
    pub fn new(strategy: CompressionStrategy) -> Self {
        Self {
            strategy,
            stats: Mutex::new(CompressionStats::default()),
        }
    }

    /// Snapshot of the statistics gathered so far
    pub fn stats(&self) -> CompressionStats {
        self.stats.lock().clone()
    }

    /// Compress a buffer according to the strategy
    ///
    /// # Returns
    ///
    /// The header-tagged buffer. Raw storage is used when the strategy is
    /// `None`, the input is tiny, or LZ4 would not save space.
    pub fn compress(&self, content: &[u8]) -> Result<Vec<u8>> {
        if self.strategy == CompressionStrategy::None || content.len() < MIN_COMPRESS_SIZE {
            return Ok(self.store_raw(content));
        }

        let start = Instant::now();
        let compressed = compress_prepend_size(content);
        if compressed.len() >= content.len() {
            trace!("Compression not beneficial for {} bytes, storing raw", content.len());
            return Ok(self.store_raw(content));
        }

        {
            let mut stats = self.stats.lock();
            stats.buffers_compressed += 1;
            stats.bytes_saved += content.len() - compressed.len();
            stats.compression_time_us += start.elapsed().as_micros() as u64;
        }
        trace!("Compressed {} -> {} bytes", content.len(), compressed.len());

        let mut result = Vec::with_capacity(LZ4_MAGIC.len() + compressed.len());
        result.extend_from_slice(LZ4_MAGIC);
        result.extend_from_slice(&compressed);
        Ok(result)
    }

    /// Decompress a buffer produced by [`CompressionEngine::compress`]
    ///
    /// The format is detected from the header, so a repository can read
    /// blocks regardless of the strategy that wrote them.
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::CorruptedData`] if the header is unknown or the
    ///   LZ4 stream is invalid
    pub fn decompress(&self, content: &[u8]) -> Result<Vec<u8>> {
        if content.len() < 4 {
            return Err(StrongboxError::corrupted("compressed buffer too short"));
        }

        if let Some(body) = content.strip_prefix(LZ4_MAGIC) {
            decompress_size_prepended(body)
                .map_err(|e| StrongboxError::corrupted(format!("LZ4 decompression failed: {}", e)))
        } else if let Some(body) = content.strip_prefix(RAW_MAGIC) {
            Ok(body.to_vec())
        } else {
            Err(StrongboxError::corrupted("unknown compression header"))
        }
    }

    fn store_raw(&self, content: &[u8]) -> Vec<u8> {
        self.stats.lock().buffers_stored_raw += 1;
        let mut result = Vec::with_capacity(RAW_MAGIC.len() + content.len());
        result.extend_from_slice(RAW_MAGIC);
        result.extend_from_slice(content);
        result
    }
}

impl Default for CompressionEngine {
    fn default() -> Self {
        Self::new(CompressionStrategy::default())
    }
}
