//! Directory-per-checkpoint save/load/remove

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ckpt_core::{Device, Error, Result, SaveStrategy, StateDict};
use storage::StorageBackend;
use tracing::{debug, info, info_span, instrument, Instrument, Span};

use crate::backend::ShardedBackend;
use crate::device::{Accelerator, DeviceFixup};
use crate::oracle::ExistenceOracle;
use crate::path::{storage_key, to_directory};

/// Backend-specific storage options; never honored by [`CheckpointStore`]
pub type StorageOptions = HashMap<String, String>;

/// Caller-supplied device relocation for a load; never honored by
/// [`CheckpointStore`], which always places tensors on the current device
pub enum DeviceRemap {
    /// Move everything to one device
    To(Device),

    /// Per-device mapping
    Map(HashMap<Device, Device>),

    /// Arbitrary relocation function
    With(Box<dyn Fn(Device) -> Device + Send + Sync>),
}

impl fmt::Debug for DeviceRemap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRemap::To(device) => f.debug_tuple("To").field(device).finish(),
            DeviceRemap::Map(map) => f.debug_tuple("Map").field(map).finish(),
            DeviceRemap::With(_) => f.write_str("With(..)"),
        }
    }
}

/// What a save actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The backend wrote the checkpoint
    Written,

    /// A complete checkpoint was already present; nothing was written
    Skipped,
}

/// Checkpoint I/O capability: the three operations a trainer needs
#[async_trait]
pub trait CheckpointIo: Send + Sync {
    async fn save_checkpoint(
        &self,
        payload: &StateDict,
        path: &Path,
        storage_options: Option<StorageOptions>,
    ) -> Result<SaveOutcome>;

    async fn load_checkpoint(
        &self,
        path: &Path,
        layout_hint: Option<&StateDict>,
        device_remap: Option<DeviceRemap>,
    ) -> Result<StateDict>;

    async fn remove_checkpoint(&self, path: &Path) -> Result<()>;
}

/// Saves, loads and removes distributed checkpoint directories
///
/// The save strategy is fixed at construction and reused for every save.
/// Shard writing and reading are delegated to a [`ShardedBackend`]; this
/// type only decides whether and where to call it.
pub struct CheckpointStore {
    strategy: SaveStrategy,
    storage: Arc<dyn StorageBackend>,
    backend: Arc<dyn ShardedBackend>,
    oracle: ExistenceOracle,
    fixup: DeviceFixup,
    span: Span,
}

impl CheckpointStore {
    pub fn new(
        strategy: SaveStrategy,
        storage: Arc<dyn StorageBackend>,
        backend: Arc<dyn ShardedBackend>,
        accelerator: Arc<dyn Accelerator>,
    ) -> Self {
        let span = info_span!("checkpoint_io", format = %strategy.format);
        span.in_scope(|| info!(strategy = %strategy, "Using dist-ckpt save strategy"));

        Self {
            oracle: ExistenceOracle::new(storage.clone(), backend.clone()),
            fixup: DeviceFixup::new(accelerator),
            strategy,
            storage,
            backend,
            span,
        }
    }

    /// Run every operation inside `span` instead of the default one
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn strategy(&self) -> &SaveStrategy {
        &self.strategy
    }

    /// Whether the checkpoint named by `identifier` (marked or not) is
    /// complete on disk
    pub async fn is_distributed_checkpoint(&self, identifier: &Path) -> Result<bool> {
        let dir = to_directory(identifier)?;
        self.oracle.is_distributed_checkpoint(&dir).await
    }

    #[instrument(name = "save_checkpoint", skip_all, fields(path = %path.display()))]
    async fn save_inner(
        &self,
        payload: &StateDict,
        path: &Path,
        storage_options: Option<StorageOptions>,
    ) -> Result<SaveOutcome> {
        if storage_options.is_some() {
            return Err(Error::unsupported("storage_options", "CheckpointStore::save_checkpoint"));
        }

        let dir = to_directory(path)?;
        if self.oracle.is_distributed_checkpoint(&dir).await? {
            info!(
                path = %dir.display(),
                "Distributed checkpoint already exists, skipping saving"
            );
            return Ok(SaveOutcome::Skipped);
        }

        self.storage.create_dir_all(storage_key(&dir)?).await?;
        self.backend.save(payload, &dir, &self.strategy).await?;

        debug!(path = %dir.display(), "Distributed checkpoint saved");
        Ok(SaveOutcome::Written)
    }

    #[instrument(name = "load_checkpoint", skip_all, fields(path = %path.display()))]
    async fn load_inner(
        &self,
        path: &Path,
        layout_hint: Option<&StateDict>,
        device_remap: Option<DeviceRemap>,
    ) -> Result<StateDict> {
        if device_remap.is_some() {
            return Err(Error::unsupported("map_location", "CheckpointStore::load_checkpoint"));
        }

        let key = storage_key(path)?;
        if !self.storage.exists(key).await? {
            return Err(Error::NotFound {
                path: path.display().to_string(),
            });
        }
        if !self.storage.is_dir(key).await? {
            return Err(Error::InvalidLayout {
                path: path.display().to_string(),
            });
        }

        let checkpoint = self.backend.load(path, layout_hint).await?;
        self.fixup.relocate(&checkpoint)
    }

    #[instrument(name = "remove_checkpoint", skip_all, fields(path = %path.display()))]
    async fn remove_inner(&self, path: &Path) -> Result<()> {
        let key = storage_key(path)?;
        if self.storage.exists(key).await? {
            self.storage.remove_all(key).await?;
            debug!(path = %path.display(), "Removed checkpoint");
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointIo for CheckpointStore {
    /// Save `payload` to the directory named by `path`.
    ///
    /// `storage_options` must be `None`. If the directory already holds a
    /// complete checkpoint nothing is written and [`SaveOutcome::Skipped`] is
    /// returned: several processes may try to save the same step.
    async fn save_checkpoint(
        &self,
        payload: &StateDict,
        path: &Path,
        storage_options: Option<StorageOptions>,
    ) -> Result<SaveOutcome> {
        self.save_inner(payload, path, storage_options)
            .instrument(self.span.clone())
            .await
    }

    /// Load the checkpoint directory at `path` (not normalized) and place
    /// its tensors on the current device.
    ///
    /// `device_remap` must be `None`.
    async fn load_checkpoint(
        &self,
        path: &Path,
        layout_hint: Option<&StateDict>,
        device_remap: Option<DeviceRemap>,
    ) -> Result<StateDict> {
        self.load_inner(path, layout_hint, device_remap)
            .instrument(self.span.clone())
            .await
    }

    /// Recursively delete `path`; an absent path is not an error.
    async fn remove_checkpoint(&self, path: &Path) -> Result<()> {
        self.remove_inner(path).instrument(self.span.clone()).await
    }
}
