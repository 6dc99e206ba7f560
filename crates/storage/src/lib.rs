//! Storage - Pluggable filesystem backends for checkpoint directories
//!
//! Provides async storage operations with support for:
//! - Local filesystem (default feature)
//! - Amazon S3 / S3-compatible storage (with `s3` feature)
//!
//! # Example
//!
//! ```no_run
//! use storage::{StorageBackend, LocalStorage};
//! use bytes::Bytes;
//!
//! # async fn example() -> ckpt_core::Result<()> {
//! let storage = LocalStorage::new("/tmp/checkpoints");
//! storage.create_dir_all("step10").await?;
//! storage.write("step10/shard-00000.bin", Bytes::from(vec![1, 2, 3])).await?;
//! assert!(storage.is_dir("step10").await?);
//! storage.remove_all("step10").await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod local;

#[cfg(feature = "s3")]
mod s3;

use std::sync::Arc;

use ckpt_core::{Result, StorageConfig, StorageKind};

pub use backend::StorageBackend;
pub use local::LocalStorage;

#[cfg(feature = "s3")]
pub use s3::{S3Config, S3Storage};

/// Build the storage backend described by `config`
///
/// For S3, `base_path` becomes the key prefix. Requesting S3 from a build
/// without the `s3` feature fails with `StorageUnavailable`.
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    match &config.backend {
        StorageKind::Local => Ok(Arc::new(LocalStorage::new(&config.base_path))),

        #[cfg(feature = "s3")]
        StorageKind::S3 {
            endpoint,
            region,
            bucket,
        } => {
            let storage = S3Storage::with_config(S3Config {
                bucket: bucket.clone(),
                prefix: (!config.base_path.is_empty()).then(|| config.base_path.clone()),
                endpoint_url: endpoint.clone(),
                region: Some(region.clone()),
                force_path_style: endpoint.is_some(),
            })
            .await;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "s3"))]
        StorageKind::S3 { .. } => Err(ckpt_core::Error::StorageUnavailable {
            backend: "s3".to_string(),
        }),
    }
}
