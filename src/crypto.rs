//! Key derivation and authenticated encryption
//!
//! ## Overview
//!
//! A repository has one random master key, generated at creation and never
//! changed afterwards. The master key is wrapped under a key derived from the
//! user's password with Argon2id, so changing the password only re-wraps it.
//! Subkeys for block encryption, content ids and the directory index are
//! derived from the master key with HKDF-SHA256.
//!
//! ## Cost tiers
//!
//! | Tier          | Argon2id iterations | Memory  |
//! |---------------|---------------------|---------|
//! | `Interactive` | 2                   | 64 MiB  |
//! | `Moderate`    | 3                   | 256 MiB |
//! | `Sensitive`   | 4                   | 1 GiB   |
//!
//! ## Sealed format
//!
//! Every sealed buffer is `nonce || ciphertext || tag`, with a fresh random
//! nonce per call. Associated data binds a ciphertext to its identity, so a
//! block moved under another id fails authentication.
//!
//! ## Examples
//!
//! ```rust
//! use strongbox::crypto::{Cipher, Crypto, Key};
//!
//! let crypto = Crypto::new(Cipher::Xchacha);
//! let key = Key::generate();
//! let sealed = crypto.encrypt_block(&key, b"secret", b"block-1")?;
//! assert_eq!(crypto.decrypt_block(&key, &sealed, b"block-1")?, b"secret");
//! assert!(crypto.decrypt_block(&key, &sealed, b"block-2").is_err());
//! # Ok::<(), strongbox::StrongboxError>(())
//! ```

use crate::error::{Result, StrongboxError};
use aes_gcm::Aes256Gcm;
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of a password salt in bytes
pub const SALT_SIZE: usize = 16;

/// Size of the authentication tag appended by both ciphers
pub const TAG_SIZE: usize = 16;

const XCHACHA_NONCE_SIZE: usize = 24;
const AES_NONCE_SIZE: usize = 12;

/// Argon2id time cost tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum OpsLimit {
    /// Fast enough for interactive logins
    #[default]
    Interactive,
    /// Slower, for less frequent unlocks
    Moderate,
    /// Slowest, for highly sensitive data
    Sensitive,
}

impl OpsLimit {
    fn iterations(self) -> u32 {
        match self {
            OpsLimit::Interactive => 2,
            OpsLimit::Moderate => 3,
            OpsLimit::Sensitive => 4,
        }
    }

    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(OpsLimit::Interactive),
            1 => Ok(OpsLimit::Moderate),
            2 => Ok(OpsLimit::Sensitive),
            other => Err(StrongboxError::corrupted(format!("unknown ops limit {}", other))),
        }
    }
}

/// Argon2id memory cost tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum MemLimit {
    /// 64 MiB
    #[default]
    Interactive,
    /// 256 MiB
    Moderate,
    /// 1 GiB
    Sensitive,
}

impl MemLimit {
    fn kib(self) -> u32 {
        match self {
            MemLimit::Interactive => 64 * 1024,
            MemLimit::Moderate => 256 * 1024,
            MemLimit::Sensitive => 1024 * 1024,
        }
    }

    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MemLimit::Interactive),
            1 => Ok(MemLimit::Moderate),
            2 => Ok(MemLimit::Sensitive),
            other => Err(StrongboxError::corrupted(format!("unknown mem limit {}", other))),
        }
    }
}

/// Password hashing cost, a pair of ops and mem tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cost {
    /// Time cost tier
    pub ops: OpsLimit,
    /// Memory cost tier
    pub mem: MemLimit,
}

impl Cost {
    /// Create a cost from its two tiers
    pub fn new(ops: OpsLimit, mem: MemLimit) -> Self {
        Self { ops, mem }
    }

    /// Pack into one byte, ops in the low nibble and mem in the high nibble
    pub fn to_u8(self) -> u8 {
        self.ops.to_u8() | (self.mem.to_u8() << 4)
    }

    /// Unpack a byte produced by [`Cost::to_u8`]
    pub fn from_u8(value: u8) -> Result<Self> {
        Ok(Self {
            ops: OpsLimit::from_u8(value & 0x0f)?,
            mem: MemLimit::from_u8(value >> 4)?,
        })
    }
}

/// Authenticated cipher used for every sealed buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Cipher {
    /// XChaCha20-Poly1305 with a 24-byte nonce
    #[default]
    Xchacha,
    /// AES-256-GCM with a 12-byte nonce
    Aes,
}

impl Cipher {
    /// Nonce length prepended to each sealed buffer
    pub fn nonce_size(self) -> usize {
        match self {
            Cipher::Xchacha => XCHACHA_NONCE_SIZE,
            Cipher::Aes => AES_NONCE_SIZE,
        }
    }

    /// Bytes a sealed buffer adds on top of its plaintext
    pub fn overhead(self) -> usize {
        self.nonce_size() + TAG_SIZE
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Cipher::Aes => 0,
            Cipher::Xchacha => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Cipher::Aes),
            1 => Ok(Cipher::Xchacha),
            other => Err(StrongboxError::corrupted(format!("unknown cipher {}", other))),
        }
    }
}

/// A 256-bit key, zeroized on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Derive a purpose-bound subkey with HKDF-SHA256
    pub fn derive_subkey(&self, label: &[u8]) -> Result<Key> {
        let hkdf = Hkdf::<Sha256>::new(None, &self.0);
        let mut okm = [0u8; KEY_SIZE];
        hkdf.expand(label, &mut okm)
            .map_err(|e| StrongboxError::Crypto(format!("HKDF expand failed: {}", e)))?;
        Ok(Key(okm))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key").field("bytes", &"[REDACTED]").finish()
    }
}

/// Random salt for password hashing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generate a random salt
    pub fn generate() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw salt bytes
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw salt bytes
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// Derive a key from a password with Argon2id
///
/// Deterministic for the same password, salt and cost. Slow and memory hard
/// on purpose; the cost tiers trade latency for brute-force resistance.
///
/// # Errors
///
/// - [`StrongboxError::Crypto`] if the parameters are rejected by Argon2
pub fn derive_key(password: &str, salt: &Salt, cost: Cost) -> Result<Key> {
    let params = Params::new(cost.mem.kib(), cost.ops.iterations(), 1, Some(KEY_SIZE))
        .map_err(|e| StrongboxError::Crypto(format!("invalid Argon2id params: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut out)
        .map_err(|e| StrongboxError::Crypto(format!("Argon2id failed: {}", e)))?;
    Ok(Key(out))
}

/// Keyed BLAKE3 hash, used for content ids
pub fn keyed_hash(key: &Key, data: &[u8]) -> [u8; 32] {
    *blake3::keyed_hash(key.as_bytes(), data).as_bytes()
}

/// Authenticated encryption engine for a single cipher
#[derive(Debug, Clone, Copy)]
pub struct Crypto {
    cipher: Cipher,
}

impl Crypto {
    /// Create an engine for the given cipher
    pub fn new(cipher: Cipher) -> Self {
        Self { cipher }
    }

    /// Cipher in use
    pub fn cipher(&self) -> Cipher {
        self.cipher
    }

    /// Encrypt and authenticate a buffer
    ///
    /// # Arguments
    ///
    /// * `key` - Encryption key
    /// * `plain` - Plaintext to seal
    /// * `aad` - Associated data authenticated but not stored
    ///
    /// # Returns
    ///
    /// `nonce || ciphertext || tag`
    pub fn encrypt_block(&self, key: &Key, plain: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = vec![0u8; self.cipher.nonce_size()];
        rand::rng().fill_bytes(&mut nonce);
        let payload = Payload { msg: plain, aad };

        let sealed = match self.cipher {
            Cipher::Xchacha => {
                XChaCha20Poly1305::new(key.as_bytes().into()).encrypt(XNonce::from_slice(&nonce), payload)
            }
            Cipher::Aes => {
                Aes256Gcm::new(key.as_bytes().into()).encrypt(aes_gcm::Nonce::from_slice(&nonce), payload)
            }
        }
        .map_err(|_| StrongboxError::Crypto("encryption failed".to_string()))?;

        let mut out = nonce;
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Verify and decrypt a buffer produced by [`Crypto::encrypt_block`]
    ///
    /// # Errors
    ///
    /// - [`StrongboxError::CorruptedData`] if the buffer is truncated, the tag
    ///   does not verify, or the associated data differs. No plaintext is
    ///   returned in that case.
    pub fn decrypt_block(&self, key: &Key, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < self.cipher.overhead() {
            return Err(StrongboxError::corrupted("sealed buffer too short"));
        }
        let (nonce, body) = sealed.split_at(self.cipher.nonce_size());
        let payload = Payload { msg: body, aad };

        match self.cipher {
            Cipher::Xchacha => {
                XChaCha20Poly1305::new(key.as_bytes().into()).decrypt(XNonce::from_slice(nonce), payload)
            }
            Cipher::Aes => {
                Aes256Gcm::new(key.as_bytes().into()).decrypt(aes_gcm::Nonce::from_slice(nonce), payload)
            }
        }
        .map_err(|_| StrongboxError::corrupted("authentication failed"))
    }
}

/// Known-answer check run once by `init_env`
pub(crate) fn self_test() -> Result<()> {
    let key = Key::from_bytes([7u8; KEY_SIZE]);
    let subkey = key.derive_subkey(b"self-test")?;
    if subkey == key {
        return Err(StrongboxError::Crypto("HKDF produced identity".to_string()));
    }

    for cipher in [Cipher::Xchacha, Cipher::Aes] {
        let crypto = Crypto::new(cipher);
        let mut sealed = crypto.encrypt_block(&subkey, b"strongbox", b"aad")?;
        if crypto.decrypt_block(&subkey, &sealed, b"aad")? != b"strongbox" {
            return Err(StrongboxError::Crypto(format!("{:?} round trip mismatch", cipher)));
        }
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        if crypto.decrypt_block(&subkey, &sealed, b"aad").is_ok() {
            return Err(StrongboxError::Crypto(format!("{:?} accepted a forged tag", cipher)));
        }
    }
    Ok(())
}
