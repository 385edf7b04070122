//! Per-file version history
//!
//! Each file owns a [`VersionManager`]: a bounded FIFO of immutable
//! [`Version`] snapshots. Committing a version beyond the limit evicts the
//! single oldest one and hands it back to the caller, which releases its
//! blocks. The newest version is the file's current content and is never
//! evicted.

use crate::content::BlockRef;
use crate::error::{Result, StrongboxError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// An immutable snapshot of a file's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    num: u64,
    len: u64,
    created_at: DateTime<Utc>,
    blocks: Vec<BlockRef>,
}

impl Version {
    pub(crate) fn new(num: u64, len: u64, blocks: Vec<BlockRef>) -> Self {
        Self {
            num,
            len,
            created_at: Utc::now(),
            blocks,
        }
    }

    /// Version number, starting at 1
    pub fn num(&self) -> u64 {
        self.num
    }

    /// Content length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the content is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// When the version was committed
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn blocks(&self) -> &[BlockRef] {
        &self.blocks
    }
}

/// Bounded version history of one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct VersionManager {
    versions: VecDeque<Version>,
    limit: u8,
}

impl VersionManager {
    /// History holding only an empty version 1
    pub fn new(limit: u8) -> Result<Self> {
        Self::with_initial(limit, 0, Vec::new())
    }

    /// History holding version 1 with the given content
    pub fn with_initial(limit: u8, len: u64, blocks: Vec<BlockRef>) -> Result<Self> {
        check_limit(limit)?;
        let mut versions = VecDeque::with_capacity(limit as usize + 1);
        versions.push_back(Version::new(1, len, blocks));
        Ok(Self { versions, limit })
    }

    pub fn limit(&self) -> u8 {
        self.limit
    }

    /// The current version
    pub fn current(&self) -> &Version {
        // Never empty: built with one version and eviction keeps the newest
        &self.versions[self.versions.len() - 1]
    }

    pub fn current_num(&self) -> u64 {
        self.current().num
    }

    pub fn next_num(&self) -> u64 {
        self.current_num() + 1
    }

    /// Retained versions, oldest first
    pub fn history(&self) -> Vec<Version> {
        self.versions.iter().cloned().collect()
    }

    pub fn get(&self, num: u64) -> Option<&Version> {
        self.versions.iter().find(|v| v.num == num)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Version> {
        self.versions.iter()
    }

    /// Append a committed version, evicting the oldest one past the limit
    ///
    /// # Returns
    ///
    /// The evicted version, if any
    pub fn commit(&mut self, version: Version) -> Option<Version> {
        debug_assert_eq!(version.num, self.next_num());
        self.versions.push_back(version);
        if self.versions.len() > self.limit as usize {
            self.versions.pop_front()
        } else {
            None
        }
    }
}

fn check_limit(limit: u8) -> Result<()> {
    if limit == 0 {
        return Err(StrongboxError::invalid_input("version limit must be at least 1"));
    }
    Ok(())
}

/// Validate a user supplied version limit
pub(crate) fn validate_limit(limit: u8) -> Result<u8> {
    check_limit(limit)?;
    Ok(limit)
}
