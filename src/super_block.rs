//! Password-wrapped repository key record
//!
//! The super block is the only record a password unlocks directly. It has a
//! plaintext head and a sealed body:
//!
//! ```text
//! head  = "SBOX" | format u8 | salt [16] | cost u8 | cipher u8
//! body  = seal(derive_key(password, salt, cost), bincode(SuperBody), aad = head)
//! ```
//!
//! The head carries exactly what is needed to derive the wrapping key. Using
//! it as associated data means any edit to the head breaks the seal.
//!
//! Every save writes the same record twice, under
//! [`MetaKey::SuperBlock`] and [`MetaKey::SuperBlockMirror`]. Opening
//! requires both copies to agree; [`SuperBlock::repair`] restores one from
//! the other after an interrupted save.
//!
//! The body holds the random master key. Every other key in the repository is
//! derived from it, so re-wrapping the body under a new password leaves all
//! stored blocks readable.

use crate::crypto::{derive_key, Cipher, Cost, Crypto, Key, Salt, SALT_SIZE};
use crate::error::{Result, StrongboxError};
use crate::storage::{MetaKey, Storage};
use crate::types::{RepoConfig, VolumeId, ENGINE_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

const MAGIC: &[u8; 4] = b"SBOX";
const FORMAT_VERSION: u8 = 1;
const HEAD_LEN: usize = MAGIC.len() + 1 + SALT_SIZE + 1 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Head {
    pub salt: Salt,
    pub cost: Cost,
    pub cipher: Cipher,
}

impl Head {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEAD_LEN);
        buf.extend_from_slice(MAGIC);
        buf.push(FORMAT_VERSION);
        buf.extend_from_slice(self.salt.as_bytes());
        buf.push(self.cost.to_u8());
        buf.push(self.cipher.to_u8());
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEAD_LEN || &buf[..MAGIC.len()] != MAGIC {
            return Err(StrongboxError::corrupted("not a super block"));
        }
        if buf[MAGIC.len()] != FORMAT_VERSION {
            return Err(StrongboxError::corrupted(format!(
                "unsupported super block format {}",
                buf[MAGIC.len()]
            )));
        }

        let salt_start = MAGIC.len() + 1;
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&buf[salt_start..salt_start + SALT_SIZE]);
        Ok(Self {
            salt: Salt::from_bytes(salt),
            cost: Cost::from_u8(buf[HEAD_LEN - 2])?,
            cipher: Cipher::from_u8(buf[HEAD_LEN - 1])?,
        })
    }
}

/// Sealed part of the super block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SuperBody {
    pub volume_id: VolumeId,
    pub master_key: Key,
    pub engine_version: String,
    pub uri: String,
    pub config: RepoConfig,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub seq: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct SuperBlock {
    pub head: Head,
    pub body: SuperBody,
}

impl SuperBlock {
    /// Fresh super block for a new repository
    pub fn new(uri: &str, config: RepoConfig) -> Self {
        let now = Utc::now();
        Self {
            head: Head {
                salt: Salt::generate(),
                cost: config.cost,
                cipher: config.cipher,
            },
            body: SuperBody {
                volume_id: VolumeId::generate(),
                master_key: Key::generate(),
                engine_version: ENGINE_VERSION.to_string(),
                uri: uri.to_string(),
                config,
                created_at: now,
                modified_at: now,
                seq: 0,
            },
        }
    }

    /// Seal under `password` and store both copies, replacing any previous record
    #[instrument(skip_all, fields(seq = self.body.seq))]
    pub fn save(&self, storage: &dyn Storage, password: &str) -> Result<()> {
        let wrap_key = derive_key(password, &self.head.salt, self.head.cost)?;
        let head = self.head.encode();
        let body = Zeroizing::new(bincode::serde::encode_to_vec(&self.body, bincode::config::standard())?);
        let sealed = Crypto::new(self.head.cipher).encrypt_block(&wrap_key, &body, &head)?;

        let mut record = head;
        record.extend_from_slice(&sealed);
        storage.put_meta(MetaKey::SuperBlock, &record)?;
        storage.put_meta(MetaKey::SuperBlockMirror, &record)?;
        debug!("Saved super block");
        Ok(())
    }

    /// Unseal one stored copy
    ///
    /// `wrap` caches the last derived key so that two copies with the same
    /// head only pay for password hashing once.
    fn open_copy(record: &[u8], password: &str, wrap: &mut Option<(Head, Key)>) -> Result<Self> {
        let head = Head::decode(record)?;
        let cached = wrap
            .as_ref()
            .filter(|(cached, _)| *cached == head)
            .map(|(_, key)| key.clone());
        let wrap_key = match cached {
            Some(key) => key,
            None => {
                let key = derive_key(password, &head.salt, head.cost)?;
                *wrap = Some((head, key.clone()));
                key
            }
        };

        let body = Crypto::new(head.cipher)
            .decrypt_block(&wrap_key, &record[HEAD_LEN..], &record[..HEAD_LEN])
            .map(Zeroizing::new)
            .map_err(|_| StrongboxError::WrongPassword)?;
        let (body, _): (SuperBody, usize) =
            bincode::serde::decode_from_slice(&body, bincode::config::standard())?;

        Ok(Self { head, body })
    }

    fn load_copy(storage: &dyn Storage, key: MetaKey, password: &str, wrap: &mut Option<(Head, Key)>) -> Result<Self> {
        Self::open_copy(&storage.get_meta(key)?, password, wrap)
    }

    /// Load and unseal the stored super block
    ///
    /// Both copies must unseal and agree; otherwise the repository needs
    /// [`SuperBlock::repair`].
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::WrongPassword`] if the primary copy does not unseal
    /// - [`StrongboxError::CorruptedData`] if a head is malformed or the
    ///   mirror copy is damaged or stale
    #[instrument(skip_all)]
    pub fn load(storage: &dyn Storage, password: &str) -> Result<Self> {
        let mut wrap = None;
        let primary = Self::load_copy(storage, MetaKey::SuperBlock, password, &mut wrap)?;
        let mirror = Self::load_copy(storage, MetaKey::SuperBlockMirror, password, &mut wrap);

        match mirror {
            Ok(mirror) if mirror.body.volume_id == primary.body.volume_id && mirror.body.seq == primary.body.seq => {
                Ok(primary)
            }
            Ok(_) => Err(needs_repair()),
            Err(e) if is_damage(&e) => Err(needs_repair()),
            Err(e) => Err(e),
        }
    }

    /// Restore a damaged or stale copy from the other one
    ///
    /// The copy with the higher sequence number wins. Returns `false` when
    /// both copies were already intact and in step.
    ///
    /// # Errors
    ///
    /// - the error of the primary copy if neither copy unseals
    /// - [`StrongboxError::CorruptedData`] if the copies belong to different
    ///   repositories
    #[instrument(skip_all)]
    pub fn repair(storage: &dyn Storage, password: &str) -> Result<bool> {
        let mut wrap = None;
        let primary = Self::load_copy(storage, MetaKey::SuperBlock, password, &mut wrap);
        let mirror = Self::load_copy(storage, MetaKey::SuperBlockMirror, password, &mut wrap);

        let keep = match (primary, mirror) {
            (Ok(primary), Ok(mirror)) => {
                if primary.body.volume_id != mirror.body.volume_id || primary.body.master_key != mirror.body.master_key {
                    return Err(StrongboxError::corrupted("super block copies belong to different repositories"));
                }
                match primary.body.seq.cmp(&mirror.body.seq) {
                    Ordering::Equal => {
                        debug!("Super block copies agree, nothing to repair");
                        return Ok(false);
                    }
                    Ordering::Greater => primary,
                    Ordering::Less => mirror,
                }
            }
            (Ok(primary), Err(e)) => {
                warn!("Super block mirror unusable: {}", e);
                primary
            }
            (Err(e), Ok(mirror)) => {
                warn!("Primary super block unusable: {}", e);
                mirror
            }
            (Err(e), Err(_)) => return Err(e),
        };

        keep.save(storage, password)?;
        info!("Repaired super block at sequence {}", keep.body.seq);
        Ok(true)
    }

    /// Re-wrap the master key under a new password and cost
    ///
    /// The old password is checked against the stored record, not against
    /// this in-memory copy. The primary copy is written before the mirror,
    /// so a failure between the two leaves copies that
    /// [`SuperBlock::repair`] can bring back in step. On failure `self` is
    /// left unchanged.
    pub fn reset_password(
        &mut self,
        storage: &dyn Storage,
        old_password: &str,
        new_password: &str,
        cost: Cost,
    ) -> Result<()> {
        let stored = Self::load(storage, old_password)?;
        if stored.body.volume_id != self.body.volume_id {
            return Err(StrongboxError::internal("super block changed underneath"));
        }

        let mut next = stored;
        next.head.salt = Salt::generate();
        next.head.cost = cost;
        next.body.config.cost = cost;
        next.body.modified_at = Utc::now();
        next.body.seq += 1;
        next.save(storage, new_password)?;

        *self = next;
        Ok(())
    }
}

fn needs_repair() -> StrongboxError {
    StrongboxError::corrupted("super block copies disagree, repair the super block")
}

/// Whether a copy failed because of its content rather than the backend
fn is_damage(e: &StrongboxError) -> bool {
    e.is_corruption() || e.is_not_found() || matches!(e, StrongboxError::WrongPassword)
}
