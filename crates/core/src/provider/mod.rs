//! Provider adapter trait definition
//!
//! This trait defines the capability set every storage backend exposes to the
//! transfer engine. It allows the engine to be decoupled from any specific
//! provider SDK, and can be mocked for testing.

mod local;
mod memory;
mod registry;

pub use local::{LocalFactory, LocalProvider};
pub use memory::{MemoryFactory, MemoryProvider};
pub use registry::{AdapterFactory, ProviderRegistry};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::path::LocationRef;

/// Content checksum as reported by a provider
///
/// The algorithm is an opaque label; two checksums are only comparable when
/// their labels match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    /// Algorithm label, e.g. "md5"
    pub algorithm: String,
    /// Lowercase hex digest
    pub value: String,
}

impl Checksum {
    pub fn new(algorithm: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            value: value.into().to_ascii_lowercase(),
        }
    }

    pub fn md5(value: impl Into<String>) -> Self {
        Self::new("md5", value)
    }

    /// Compare against another checksum
    ///
    /// Returns None when the algorithms differ and no verdict is possible.
    pub fn matches(&self, other: &Checksum) -> Option<bool> {
        if self.algorithm.eq_ignore_ascii_case(&other.algorithm) {
            Some(self.value == other.value)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// Metadata snapshot for an object or directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Where the object lives
    pub reference: LocationRef,

    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Content checksum, when the provider exposes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,

    /// Last modified timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<Timestamp>,

    /// Whether this is a directory/prefix
    pub is_directory: bool,
}

impl ObjectDescriptor {
    /// Create a new descriptor for a file
    pub fn file(reference: LocationRef, size: u64) -> Self {
        Self {
            reference,
            size,
            checksum: None,
            modified_time: None,
            is_directory: false,
        }
    }

    /// Create a new descriptor for a directory/prefix
    pub fn directory(reference: LocationRef) -> Self {
        Self {
            reference,
            size: 0,
            checksum: None,
            modified_time: None,
            is_directory: true,
        }
    }

    pub fn with_checksum(mut self, checksum: Option<Checksum>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_modified_time(mut self, modified: Option<Timestamp>) -> Self {
        self.modified_time = modified;
        self
    }

    /// Human-readable size
    pub fn size_human(&self) -> String {
        humansize::format_size(self.size, humansize::BINARY)
    }
}

/// Options for list operations
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Descend into subdirectories instead of listing one level
    pub recursive: bool,
}

/// Backend capability information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Directories must be created explicitly (hierarchical stores)
    pub requires_directories: bool,

    /// Checksum algorithm exposed on stat/list, if any
    pub checksum_algorithm: Option<String>,
}

/// Lazy, finite, non-restartable sequence of descriptors
pub type DescriptorStream = Pin<Box<dyn Stream<Item = Result<ObjectDescriptor>> + Send>>;

/// Byte stream opened for reading
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Byte sink opened for writing
///
/// Data becomes visible at the destination only after `finish` succeeds.
#[async_trait]
pub trait ObjectSink: Send {
    /// Append one chunk; awaiting this is the back-pressure point
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    /// Commit the object, returning the number of bytes written
    async fn finish(self: Box<Self>) -> Result<u64>;

    /// Discard everything written so far
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Trait for storage backend operations
///
/// Implementations must be safe for concurrent use by several workers; if a
/// backend cannot do that it must serialize internally.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Get backend capabilities
    fn capabilities(&self) -> Capabilities;

    /// List the entries below a directory location
    async fn list(&self, location: &LocationRef, options: ListOptions)
    -> Result<DescriptorStream>;

    /// Get object metadata
    async fn stat(&self, location: &LocationRef) -> Result<ObjectDescriptor>;

    /// Open an object for streaming reads
    async fn open_read(&self, location: &LocationRef) -> Result<ObjectReader>;

    /// Open a sink that creates or replaces an object
    async fn open_write(
        &self,
        location: &LocationRef,
        size_hint: Option<u64>,
    ) -> Result<Box<dyn ObjectSink>>;

    /// Delete an object
    async fn delete(&self, location: &LocationRef) -> Result<()>;

    /// Make sure a directory exists (no-op for flat object stores)
    async fn ensure_directory(&self, location: &LocationRef) -> Result<()>;
}

/// Lowercase hex MD5 of a byte slice
pub(crate) fn md5_hex(data: &[u8]) -> String {
    use md5::{Digest, Md5};

    format!("{:x}", Md5::digest(data))
}
