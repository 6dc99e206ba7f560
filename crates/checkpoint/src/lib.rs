//! Distributed checkpoint I/O
//!
//! Persists sharded training state as one directory per checkpoint:
//!
//! - [`path`] maps checkpoint identifiers (`step10.ckpt`) to directories (`step10`)
//! - [`ExistenceOracle`] tells a complete checkpoint from a partial one
//! - [`CheckpointStore`] saves (skipping complete checkpoints), loads and removes
//! - [`DeviceFixup`] moves loaded tensors onto this process's accelerator
//! - [`ContextSnapshot`] captures the trainer context to persist with a checkpoint
//!
//! Shard encoding is delegated to a [`ShardedBackend`]; [`FileShardBackend`]
//! is a file-per-rank implementation over any [`storage::StorageBackend`].

pub mod backend;
pub mod context;
pub mod device;
pub mod file_backend;
pub mod oracle;
pub mod path;
pub mod store;

pub use backend::ShardedBackend;
pub use context::{ContextSnapshot, Module, Orchestrator, Persistable, Recipe, DATAMODULE_KEY};
pub use device::{Accelerator, DeviceFixup, LocalAccelerator};
pub use file_backend::{CheckpointMetadata, FileShardBackend};
pub use oracle::ExistenceOracle;
pub use path::{to_directory, to_identifier, CHECKPOINT_EXTENSION};
pub use store::{CheckpointIo, CheckpointStore, DeviceRemap, SaveOutcome, StorageOptions};
