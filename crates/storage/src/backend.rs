//! Storage backend trait definition
//!
//! Defines the async interface that all storage backends must implement.

use async_trait::async_trait;
use bytes::Bytes;
use ckpt_core::Result;

/// Async trait for storage backends
///
/// Implementors provide file and directory operations for checkpoint
/// directories, supporting both local filesystem and remote storage (S3, etc.).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read data from the given path
    ///
    /// # Errors
    /// Returns `StoragePathNotFound` if the path doesn't exist
    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Write data to the given path
    ///
    /// Creates parent directories if they don't exist.
    /// Uses atomic writes where possible (write to temp, then rename).
    ///
    /// # Returns
    /// Number of bytes written
    async fn write(&self, path: &str, data: Bytes) -> Result<u64>;

    /// Delete the file at the given path
    ///
    /// # Errors
    /// Returns `StoragePathNotFound` if the path doesn't exist
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if a path exists, as a file or a directory
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Check if a path exists and is a directory
    ///
    /// Absence is `Ok(false)`, not an error.
    async fn is_dir(&self, path: &str) -> Result<bool>;

    /// Create a directory and all missing parents
    ///
    /// Succeeds if the directory already exists.
    async fn create_dir_all(&self, path: &str) -> Result<()>;

    /// Recursively remove a directory, or a single file
    ///
    /// # Errors
    /// Returns `StoragePathNotFound` if the path doesn't exist
    async fn remove_all(&self, path: &str) -> Result<()>;

    /// List all file paths under a given prefix
    ///
    /// # Arguments
    /// * `prefix` - Path prefix to filter by (e.g., "checkpoints/")
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}
