//! File-per-rank sharded backend
//!
//! Layout of a checkpoint directory written by `world_size` processes:
//!
//! ```text
//! step10/
//!   shard-00000.bin
//!   shard-00001.bin
//!   metadata.json      <- written last, by rank 0
//! ```
//!
//! Each rank writes its own slice of the payload. The metadata file marks the
//! directory complete; a directory without it, or missing any shard it lists,
//! is a partial write.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ckpt_core::{
    CheckpointIoConfig, Error, Result, SaveStrategy, ShardEncoding, StateDict, StateValue,
};
use serde::{Deserialize, Serialize};
use storage::StorageBackend;
use tracing::{debug, info, instrument, warn};

use crate::backend::ShardedBackend;
use crate::path::storage_key;

/// Name of the completeness marker
pub const METADATA_FILE: &str = "metadata.json";

/// Checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Contents of `metadata.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    pub version: u32,
    pub format: String,
    pub replication: u32,
    pub world_size: u32,
    pub encoding: ShardEncoding,
    pub created_at: DateTime<Utc>,
}

/// Shard file name for a rank
pub fn shard_file_name(rank: u32) -> String {
    format!("shard-{:05}.bin", rank)
}

/// Sharded backend storing one file per rank through a [`StorageBackend`]
pub struct FileShardBackend {
    storage: Arc<dyn StorageBackend>,
    rank: u32,
    world_size: u32,
    encoding: ShardEncoding,
}

impl FileShardBackend {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        rank: u32,
        world_size: u32,
        encoding: ShardEncoding,
    ) -> Result<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(Error::InvalidConfig {
                message: format!("rank {} out of range for world_size {}", rank, world_size),
            });
        }
        Ok(Self {
            storage,
            rank,
            world_size,
            encoding,
        })
    }

    /// Build from checkpoint configuration
    pub fn from_config(storage: Arc<dyn StorageBackend>, config: &CheckpointIoConfig) -> Result<Self> {
        config.validate()?;
        Self::new(storage, config.rank, config.world_size, config.encoding)
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    fn child(dir: &Path, name: &str) -> Result<String> {
        Ok(storage_key(&dir.join(name))?.to_string())
    }

    fn encode(&self, payload: &StateDict) -> Result<Bytes> {
        let bytes = match self.encoding {
            ShardEncoding::Bincode => bincode::serialize(payload)?,
            ShardEncoding::Json => {
                // serde_json writes NaN and infinities as null
                if let Some(key) = non_finite_key(payload) {
                    return Err(Error::Serialization(format!(
                        "non-finite value at {} cannot be encoded as json",
                        key
                    )));
                }
                serde_json::to_vec(payload)?
            }
        };
        Ok(Bytes::from(bytes))
    }

    fn decode(encoding: ShardEncoding, bytes: &[u8]) -> Result<StateDict> {
        Ok(match encoding {
            ShardEncoding::Bincode => bincode::deserialize(bytes)?,
            ShardEncoding::Json => serde_json::from_slice(bytes)?,
        })
    }

    async fn read_metadata(&self, dir: &Path) -> Result<Option<CheckpointMetadata>> {
        match self.storage.read(&Self::child(dir, METADATA_FILE)?).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(Error::StoragePathNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ShardedBackend for FileShardBackend {
    #[instrument(skip(self, payload), fields(rank = self.rank, path = %dir.display()))]
    async fn save(&self, payload: &StateDict, dir: &Path, strategy: &SaveStrategy) -> Result<()> {
        let start = std::time::Instant::now();

        let shard = self.encode(payload)?;
        let size = self
            .storage
            .write(&Self::child(dir, &shard_file_name(self.rank))?, shard)
            .await
            .map_err(|e| Error::CheckpointWriteFailed {
                message: format!("rank {} shard: {}", self.rank, e),
            })?;

        debug!(size_bytes = size, "Shard written");

        if self.rank == 0 {
            let metadata = CheckpointMetadata {
                version: CHECKPOINT_VERSION,
                format: strategy.format.clone(),
                replication: strategy.replication,
                world_size: self.world_size,
                encoding: self.encoding,
                created_at: Utc::now(),
            };
            let json = serde_json::to_vec_pretty(&metadata)?;
            self.storage
                .write(&Self::child(dir, METADATA_FILE)?, Bytes::from(json))
                .await
                .map_err(|e| Error::CheckpointWriteFailed {
                    message: format!("metadata: {}", e),
                })?;
        }

        info!(
            size_bytes = size,
            elapsed_ms = start.elapsed().as_millis(),
            strategy = %strategy,
            "Checkpoint shard saved"
        );
        Ok(())
    }

    #[instrument(skip(self, layout_hint), fields(rank = self.rank, path = %dir.display()))]
    async fn load(&self, dir: &Path, layout_hint: Option<&StateDict>) -> Result<StateDict> {
        let corrupted = |reason: String| Error::CheckpointCorrupted {
            path: dir.display().to_string(),
            reason,
        };

        let metadata = self
            .read_metadata(dir)
            .await?
            .ok_or_else(|| corrupted(format!("missing {}", METADATA_FILE)))?;

        if metadata.version != CHECKPOINT_VERSION {
            warn!(
                expected = CHECKPOINT_VERSION,
                found = metadata.version,
                "Checkpoint version mismatch"
            );
        }
        if self.rank >= metadata.world_size {
            return Err(corrupted(format!(
                "written by {} ranks, cannot serve rank {}",
                metadata.world_size, self.rank
            )));
        }

        let shard_name = shard_file_name(self.rank);
        let bytes = match self.storage.read(&Self::child(dir, &shard_name)?).await {
            Ok(bytes) => bytes,
            Err(Error::StoragePathNotFound { .. }) => {
                return Err(corrupted(format!("missing {}", shard_name)))
            }
            Err(e) => return Err(e),
        };
        let loaded = Self::decode(metadata.encoding, &bytes)?;

        match layout_hint {
            Some(hint) => apply_layout(&loaded, hint).map_err(|key| corrupted(format!("missing key {}", key))),
            None => Ok(loaded),
        }
    }

    async fn probe_is_valid_checkpoint(&self, dir: &Path) -> Result<bool> {
        let Some(metadata) = self.read_metadata(dir).await? else {
            return Ok(false);
        };

        for rank in 0..metadata.world_size {
            if !self.storage.exists(&Self::child(dir, &shard_file_name(rank))?).await? {
                debug!(path = %dir.display(), rank, "Checkpoint metadata present but shard missing");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Dotted key of the first NaN or infinite float in `dict`
fn non_finite_key(dict: &StateDict) -> Option<String> {
    fn visit(value: &StateValue) -> Option<String> {
        match value {
            StateValue::Float(f) if !f.is_finite() => Some(String::new()),
            StateValue::Tensor(tensor) if tensor.data.iter().any(|x| !x.is_finite()) => {
                Some(String::new())
            }
            StateValue::Map(map) => non_finite_key(map),
            StateValue::List(items) => items.iter().enumerate().find_map(|(i, item)| {
                visit(item).map(|rest| join_key(&i.to_string(), &rest))
            }),
            _ => None,
        }
    }

    dict.iter()
        .find_map(|(key, value)| visit(value).map(|rest| join_key(key, &rest)))
}

fn join_key(head: &str, rest: &str) -> String {
    if rest.is_empty() {
        head.to_string()
    } else {
        format!("{}.{}", head, rest)
    }
}

/// Restrict `loaded` to the keys of `hint`, recursing into nested maps and
/// carrying the hint's sharding metadata onto loaded tensors.
///
/// Returns the dotted key of the first hinted entry missing from `loaded`.
fn apply_layout(loaded: &StateDict, hint: &StateDict) -> std::result::Result<StateDict, String> {
    let mut out = StateDict::new();
    for (key, expected) in hint {
        let value = loaded.get(key).ok_or_else(|| key.clone())?;
        let value = match (value, expected) {
            (StateValue::Map(inner), StateValue::Map(inner_hint)) => {
                StateValue::Map(apply_layout(inner, inner_hint).map_err(|k| format!("{}.{}", key, k))?)
            }
            (StateValue::Tensor(tensor), StateValue::Tensor(template)) if template.sharding.is_some() => {
                let mut tensor = tensor.clone();
                tensor.sharding = template.sharding.clone();
                StateValue::Tensor(tensor)
            }
            (value, _) => value.clone(),
        };
        out.insert(key.clone(), value);
    }
    Ok(out)
}
