//! Error types for the strongbox library
//!
//! Every fallible operation in the crate returns [`Result`], whose error side is
//! [`StrongboxError`]. The variants form a closed taxonomy: each one maps to a
//! stable negative integer through [`StrongboxError::code`] so that a foreign
//! binding layer can surface the same category consistently.
//!
//! ## Fail-closed decryption
//!
//! Authentication failures never carry partially decrypted bytes. They surface
//! as [`StrongboxError::CorruptedData`] when a block or index record is damaged
//! and as [`StrongboxError::WrongPassword`] when the super block cannot be
//! unsealed with the supplied password.
//!
//! ## Interop with `std::io`
//!
//! [`File`](crate::File) implements the standard `Read`/`Write`/`Seek` traits,
//! which speak `std::io::Error`. The conversions in this module wrap a
//! `StrongboxError` inside an `io::Error` and recover it again, so callers that
//! go through `std::io` can still match on the original variant.

use std::io;
use thiserror::Error;

/// Type alias for Results in the strongbox library
pub type Result<T> = std::result::Result<T, StrongboxError>;

/// Main error type for all strongbox operations
#[derive(Debug, Error)]
pub enum StrongboxError {
    /// URI is malformed or names an unsupported storage scheme
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Password does not unseal the repository key
    #[error("Wrong password")]
    WrongPassword,

    /// A node or repository already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A node, repository or stored object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A file was found where a directory was required
    #[error("Is a file: {0}")]
    IsFile(String),

    /// A directory was found where a file was required
    #[error("Is a directory: {0}")]
    IsDir(String),

    /// The root directory cannot be removed or renamed
    #[error("Operation not allowed on root directory")]
    IsRoot,

    /// Directory still has children
    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    /// Mutation attempted on a repository opened read-only
    #[error("Repository is read-only")]
    ReadOnlyRepo,

    /// Requested version was evicted or never existed
    #[error("Version not found: {0}")]
    VersionNotFound(u64),

    /// Authentication or integrity check failed on stored data
    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// Bad argument, path or seek position
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Another handle holds the writer slot of this file
    #[error("File is being written by another handle: {0}")]
    FileInUse(String),

    /// The handle has uncommitted writes
    #[error("Pending writes must be finished first")]
    NotFinished,

    /// Repository is already opened by another instance
    #[error("Repository is already opened: {0}")]
    RepoOpened(String),

    /// Repository has been closed
    #[error("Repository is closed")]
    RepoClosed,

    /// `init_env` has not been called
    #[error("Environment not initialized, call strongbox::init_env() first")]
    Uninitialized,

    /// Key derivation or cipher setup failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// I/O errors from a storage backend
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Non-I/O storage backend failures
    #[error("Backend error: {0}")]
    Backend(String),

    /// Errors during bincode serialization/deserialization
    #[error("Encoding error: {0}")]
    Encode(String),

    /// JSON errors from backend descriptors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bincode::error::DecodeError> for StrongboxError {
    fn from(err: bincode::error::DecodeError) -> Self {
        StrongboxError::Encode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for StrongboxError {
    fn from(err: bincode::error::EncodeError) -> Self {
        StrongboxError::Encode(err.to_string())
    }
}

impl StrongboxError {
    /// Create a backend error with a custom message
    pub fn backend(msg: impl Into<String>) -> Self {
        StrongboxError::Backend(msg.into())
    }

    /// Create a corrupted data error with a custom message
    pub fn corrupted(msg: impl Into<String>) -> Self {
        StrongboxError::CorruptedData(msg.into())
    }

    /// Create an invalid input error with a custom message
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        StrongboxError::InvalidInput(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        StrongboxError::Internal(msg.into())
    }

    /// Check if this error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, StrongboxError::CorruptedData(_))
    }

    /// Check if this error means the addressed entity is missing
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StrongboxError::NotFound(_) | StrongboxError::VersionNotFound(_)
        )
    }

    /// Stable integer code for this error category
    ///
    /// Codes are negative and never reused. Zero is reserved for success by
    /// the binding layer and is never returned here.
    pub fn code(&self) -> i32 {
        match self {
            StrongboxError::InvalidUri(_) => -1,
            StrongboxError::WrongPassword => -2,
            StrongboxError::AlreadyExists(_) => -3,
            StrongboxError::NotFound(_) => -4,
            StrongboxError::IsFile(_) => -5,
            StrongboxError::IsDir(_) => -6,
            StrongboxError::ReadOnlyRepo => -7,
            StrongboxError::VersionNotFound(_) => -8,
            StrongboxError::CorruptedData(_) => -9,
            StrongboxError::InvalidInput(_) => -10,
            StrongboxError::Io(_) | StrongboxError::Backend(_) => -11,
            StrongboxError::Uninitialized => -12,
            StrongboxError::IsRoot => -13,
            StrongboxError::NotEmpty(_) => -14,
            StrongboxError::FileInUse(_) => -15,
            StrongboxError::NotFinished => -16,
            StrongboxError::RepoOpened(_) => -17,
            StrongboxError::RepoClosed => -18,
            StrongboxError::Crypto(_) => -19,
            StrongboxError::Encode(_) | StrongboxError::Json(_) => -20,
            StrongboxError::Internal(_) => -21,
        }
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            StrongboxError::NotFound(_) | StrongboxError::VersionNotFound(_) => {
                io::ErrorKind::NotFound
            }
            StrongboxError::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
            StrongboxError::InvalidInput(_) | StrongboxError::InvalidUri(_) => {
                io::ErrorKind::InvalidInput
            }
            StrongboxError::ReadOnlyRepo | StrongboxError::WrongPassword => {
                io::ErrorKind::PermissionDenied
            }
            StrongboxError::CorruptedData(_) => io::ErrorKind::InvalidData,
            StrongboxError::FileInUse(_) => io::ErrorKind::WouldBlock,
            _ => io::ErrorKind::Other,
        }
    }
}

impl From<StrongboxError> for io::Error {
    fn from(err: StrongboxError) -> Self {
        match err {
            StrongboxError::Io(inner) => inner,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}

/// Recover a `StrongboxError` that travelled through `std::io`
pub(crate) fn from_io(err: io::Error) -> StrongboxError {
    if err.get_ref().is_some_and(|inner| inner.is::<StrongboxError>()) {
        if let Some(inner) = err.into_inner() {
            if let Ok(sb) = inner.downcast::<StrongboxError>() {
                return *sb;
            }
        }
        return StrongboxError::internal("lost wrapped error");
    }
    StrongboxError::Io(err)
}
