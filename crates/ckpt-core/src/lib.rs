//! Checkpoint Core - Foundation for distributed checkpoint I/O
//!
//! Provides the payload data model, the save strategy descriptor,
//! configuration and error handling shared by the storage and
//! checkpoint crates.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod types;

pub use config::{CheckpointIoConfig, RuntimeConfig, ShardEncoding, StorageConfig, StorageKind};
pub use error::{Error, Result};
pub use types::*;
