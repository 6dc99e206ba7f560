//! Checkpoint I/O configuration types

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Error, Result, SaveStrategy};

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Checkpoint settings
    pub checkpoint: CheckpointIoConfig,

    /// Storage settings
    pub storage: StorageConfig,
}

impl RuntimeConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.checkpoint.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }
}

/// Checkpoint I/O configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointIoConfig {
    /// Save format tag handed to the sharded backend
    pub save_format: String,

    /// Shard replication factor
    pub replication: u32,

    /// Shard file encoding for the file backend
    pub encoding: ShardEncoding,

    /// Rank of this process
    pub rank: u32,

    /// Number of cooperating processes
    pub world_size: u32,
}

impl Default for CheckpointIoConfig {
    fn default() -> Self {
        Self {
            save_format: "torch_dist".to_string(),
            replication: 1,
            encoding: ShardEncoding::Bincode,
            rank: 0,
            world_size: 1,
        }
    }
}

impl CheckpointIoConfig {
    /// The save strategy descriptor for a store built from this config
    pub fn strategy(&self) -> SaveStrategy {
        SaveStrategy::new(self.save_format.clone(), self.replication)
    }

    /// Reject settings no store can run with
    pub fn validate(&self) -> Result<()> {
        if self.save_format.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "save_format must not be empty".to_string(),
            });
        }
        if self.replication == 0 {
            return Err(Error::InvalidConfig {
                message: "replication must be at least 1".to_string(),
            });
        }
        if self.world_size == 0 {
            return Err(Error::InvalidConfig {
                message: "world_size must be at least 1".to_string(),
            });
        }
        if self.rank >= self.world_size {
            return Err(Error::InvalidConfig {
                message: format!(
                    "rank {} out of range for world_size {}",
                    self.rank, self.world_size
                ),
            });
        }
        Ok(())
    }
}

/// On-disk encoding of a shard file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShardEncoding {
    /// Compact binary encoding
    Bincode,

    /// Human-readable JSON
    Json,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    pub backend: StorageKind,

    /// Base path for storage; empty resolves against the working directory
    pub base_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageKind::Local,
            base_path: String::new(),
        }
    }
}

/// Storage backend type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StorageKind {
    /// Local filesystem
    Local,

    /// S3-compatible storage
    S3 {
        endpoint: Option<String>,
        region: String,
        bucket: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.checkpoint.save_format, "torch_dist");
        assert_eq!(config.checkpoint.strategy(), SaveStrategy::new("torch_dist", 1));
        assert_eq!(config.storage.backend, StorageKind::Local);
        assert!(config.checkpoint.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.checkpoint.save_format, config.checkpoint.save_format);
        assert_eq!(parsed.checkpoint.encoding, ShardEncoding::Bincode);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            RuntimeConfig::from_json_str(r#"{"checkpoint": {"save_format": "zarr", "encoding": "json"}}"#)
                .unwrap();
        assert_eq!(config.checkpoint.save_format, "zarr");
        assert_eq!(config.checkpoint.encoding, ShardEncoding::Json);
        assert_eq!(config.checkpoint.replication, 1);
        assert_eq!(config.checkpoint.world_size, 1);
    }

    #[test]
    fn test_validate_rejects_bad_rank() {
        let result = RuntimeConfig::from_json_str(r#"{"checkpoint": {"rank": 4, "world_size": 4}}"#);
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));

        let config = CheckpointIoConfig {
            replication: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.json");
        std::fs::write(&path, r#"{"checkpoint": {"world_size": 2, "rank": 1}}"#).unwrap();

        let config = RuntimeConfig::from_json_file(&path).unwrap();
        assert_eq!(config.checkpoint.rank, 1);

        let missing = RuntimeConfig::from_json_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(Error::Io(_))));
    }
}
