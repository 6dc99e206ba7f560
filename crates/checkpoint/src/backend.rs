//! Sharded serialization backend interface
//!
//! The backend owns the bytes-to-tensor codec, the directory's internal
//! layout and the crash-safety of a write. Checkpoint I/O only decides when
//! to call it.

use std::path::Path;

use async_trait::async_trait;
use ckpt_core::{Result, SaveStrategy, StateDict};

#[async_trait]
pub trait ShardedBackend: Send + Sync {
    /// Write this process's slice of `payload` into `dir`
    ///
    /// `dir` already exists. On return the directory must be either
    /// complete or recognizably incomplete.
    async fn save(&self, payload: &StateDict, dir: &Path, strategy: &SaveStrategy) -> Result<()>;

    /// Reconstruct this process's payload from `dir`
    ///
    /// `layout_hint` describes the expected structure and sharding of the
    /// result.
    async fn load(&self, dir: &Path, layout_hint: Option<&StateDict>) -> Result<StateDict>;

    /// Whether `dir` holds a complete checkpoint written by this backend
    async fn probe_is_valid_checkpoint(&self, dir: &Path) -> Result<bool>;
}
