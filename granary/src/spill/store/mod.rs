//! Object store that holds the spilled batches
//!
//! The engine only treats the store as a byte blob provider: a blob is written under a
//! key and read back with the [`BlobHandle`] returned by the write. Credentials and
//! namespaces of the real connector are configured outside of this crate.

mod local_fs;
mod memory;

pub use self::local_fs::LocalFsObjectStore;
pub use self::memory::InMemoryObjectStore;

use std::fmt::{Debug, Display};

use snafu::Snafu;

use crate::error::{Classify, ErrorClass, SendableError};

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("I/O error on blob `{key}`"))]
    Io {
        key: String,
        source: std::io::Error,
    },
    #[snafu(display("Blob `{key}` does not exist"))]
    NotFound { key: String },
    #[snafu(display(
        "Blob `{key}` has `{actual}` bytes, but the handle records `{expect}` bytes"
    ))]
    SizeMismatch {
        key: String,
        expect: usize,
        actual: usize,
    },
    #[snafu(display("Injected failure of `{operation}` on blob `{key}`"))]
    Injected {
        operation: &'static str,
        key: String,
    },
    #[snafu(display("Object store is unavailable: {reason}"))]
    Unavailable { reason: String },
    /// Error of the client used by an external store
    #[snafu(display("Object store backend failed on blob `{key}`"))]
    Backend { key: String, source: SendableError },
}

/// Result type of the object store
pub type Result<T> = std::result::Result<T, StoreError>;

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ErrorClass::Fatal
            }
            Self::Io { .. }
            | Self::Injected { .. }
            | Self::Unavailable { .. }
            | Self::Backend { .. } => ErrorClass::Retryable,
            Self::NotFound { .. } | Self::SizeMismatch { .. } => ErrorClass::Fatal,
        }
    }
}

/// Location and size of a written blob
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobHandle {
    key: String,
    size: usize,
}

impl BlobHandle {
    /// Create a new handle
    #[inline]
    pub fn new(key: String, size: usize) -> Self {
        Self { key, size }
    }

    /// Key of the blob
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Size of the blob in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Health of the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreState {
    /// Store works
    Good,
    /// Store works with limitations, spilling may fail
    Degraded(String),
    /// Store can not be used
    Bad(String),
}

impl Display for StoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Good => write!(f, "Good"),
            Self::Degraded(reason) => write!(f, "Degraded: {reason}"),
            Self::Bad(reason) => write!(f, "Bad: {reason}"),
        }
    }
}

/// Byte blob store the spill manager writes to. Implementations should be thread safe,
/// different operators spill to the same store concurrently
pub trait ObjectStore: Debug + Send + Sync {
    /// Write the bytes under the key, an existing blob with the same key is replaced
    fn write(&self, key: &str, bytes: &[u8]) -> Result<BlobHandle>;

    /// Read the blob
    fn read(&self, handle: &BlobHandle) -> Result<Vec<u8>>;

    /// Delete the blob
    fn delete(&self, handle: &BlobHandle) -> Result<()>;

    /// Check the health of the store
    fn state(&self) -> StoreState;
}
