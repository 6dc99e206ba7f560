//! Complete-checkpoint detection

use std::path::Path;
use std::sync::Arc;

use ckpt_core::Result;
use storage::StorageBackend;
use tracing::trace;

use crate::backend::ShardedBackend;
use crate::path::storage_key;

/// Decides whether a directory holds a complete distributed checkpoint,
/// as opposed to nothing or a partial write
#[derive(Clone)]
pub struct ExistenceOracle {
    storage: Arc<dyn StorageBackend>,
    backend: Arc<dyn ShardedBackend>,
}

impl ExistenceOracle {
    pub fn new(storage: Arc<dyn StorageBackend>, backend: Arc<dyn ShardedBackend>) -> Self {
        Self { storage, backend }
    }

    /// True only if `dir` exists, is a directory, and the backend's own
    /// probe confirms completeness. An absent path is `Ok(false)`.
    pub async fn is_distributed_checkpoint(&self, dir: &Path) -> Result<bool> {
        if !self.storage.is_dir(storage_key(dir)?).await? {
            trace!(path = %dir.display(), "Not a checkpoint directory");
            return Ok(false);
        }
        self.backend.probe_is_valid_checkpoint(dir).await
    }
}
