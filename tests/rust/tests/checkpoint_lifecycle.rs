//! End-to-end checkpoint lifecycle
//!
//! Drives a store the way a trainer would: save a step, save it again from
//! a second attempt, resume from it on a process bound to another device,
//! then clean it up.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use checkpoint::{
    CheckpointIo, CheckpointStore, FileShardBackend, LocalAccelerator, SaveOutcome, ShardedBackend,
};
use ckpt_core::{Device, Error, SaveStrategy, ShardEncoding, StateDict, Tensor};
use storage::LocalStorage;

/// Counts backend writes
struct WriteCounter {
    inner: FileShardBackend,
    writes: AtomicUsize,
}

#[async_trait]
impl ShardedBackend for WriteCounter {
    async fn save(
        &self,
        payload: &StateDict,
        dir: &Path,
        strategy: &SaveStrategy,
    ) -> ckpt_core::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.save(payload, dir, strategy).await
    }

    async fn load(
        &self,
        dir: &Path,
        layout_hint: Option<&StateDict>,
    ) -> ckpt_core::Result<StateDict> {
        self.inner.load(dir, layout_hint).await
    }

    async fn probe_is_valid_checkpoint(&self, dir: &Path) -> ckpt_core::Result<bool> {
        self.inner.probe_is_valid_checkpoint(dir).await
    }
}

fn shard_tensor() -> Tensor {
    Tensor::new(vec![2, 2], vec![0.5, -1.0, 2.0, 4.0], Device::Accelerator(0))
}

#[tokio::test]
async fn test_save_skip_load_remove() -> Result<()> {
    ckpt_core::telemetry::init_tracing("checkpoint=debug,storage=debug");

    let temp_dir = tempfile::tempdir()?;
    let storage = Arc::new(LocalStorage::new(temp_dir.path()));
    let backend = Arc::new(WriteCounter {
        inner: FileShardBackend::new(storage.clone(), 0, 1, ShardEncoding::Bincode)?,
        writes: AtomicUsize::new(0),
    });

    // Writer and reader run on different devices
    let writer = CheckpointStore::new(
        SaveStrategy::new("format-A", 1),
        storage.clone(),
        backend.clone(),
        Arc::new(LocalAccelerator::new(0)),
    );
    let reader = CheckpointStore::new(
        SaveStrategy::new("format-A", 1),
        storage.clone(),
        backend.clone(),
        Arc::new(LocalAccelerator::new(1)),
    );

    let mut payload = StateDict::new();
    payload.insert("w".to_string(), shard_tensor().into());

    let outcome = writer
        .save_checkpoint(&payload, Path::new("step10.ckpt"), None)
        .await?;
    assert_eq!(outcome, SaveOutcome::Written);
    assert!(temp_dir.path().join("step10").is_dir());
    assert!(writer.is_distributed_checkpoint(Path::new("step10")).await?);

    let outcome = writer
        .save_checkpoint(&payload, Path::new("step10.ckpt"), None)
        .await?;
    assert_eq!(outcome, SaveOutcome::Skipped);
    assert_eq!(backend.writes.load(Ordering::SeqCst), 1);

    let loaded = reader
        .load_checkpoint(Path::new("step10/"), None, None)
        .await?;
    assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["w"]);
    let w = loaded["w"].as_tensor().expect("w is a tensor");
    assert_eq!(w.device, Device::Accelerator(1));
    assert_eq!(w.data, shard_tensor().data);
    assert_eq!(w.shape, shard_tensor().shape);

    reader.remove_checkpoint(Path::new("step10/")).await?;
    assert!(!temp_dir.path().join("step10").exists());

    let result = reader
        .load_checkpoint(Path::new("step10/"), None, None)
        .await;
    assert!(matches!(result, Err(Error::NotFound { .. })));

    Ok(())
}

#[tokio::test]
async fn test_two_ranks_share_one_directory() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let storage = Arc::new(LocalStorage::new(temp_dir.path()));
    let strategy = SaveStrategy::new("torch_dist", 1);

    let stores = (0..2u32)
        .map(|rank| -> Result<CheckpointStore> {
            let backend = FileShardBackend::new(storage.clone(), rank, 2, ShardEncoding::Json)?;
            Ok(CheckpointStore::new(
                strategy.clone(),
                storage.clone(),
                Arc::new(backend),
                Arc::new(LocalAccelerator::new(rank)),
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let payload_for = |rank: u32| {
        let mut payload = StateDict::new();
        payload.insert(
            "w".to_string(),
            Tensor::new(vec![1], vec![rank as f32], Device::Accelerator(rank)).into(),
        );
        payload
    };

    // Rank 0 finishes first: directory is only partial until rank 1 lands
    assert_eq!(
        stores[0]
            .save_checkpoint(&payload_for(0), Path::new("step20.ckpt"), None)
            .await?,
        SaveOutcome::Written
    );
    assert!(!stores[1].is_distributed_checkpoint(Path::new("step20.ckpt")).await?);

    assert_eq!(
        stores[1]
            .save_checkpoint(&payload_for(1), Path::new("step20.ckpt"), None)
            .await?,
        SaveOutcome::Written
    );
    assert!(stores[0].is_distributed_checkpoint(Path::new("step20.ckpt")).await?);

    for (rank, store) in stores.iter().enumerate() {
        let loaded = store.load_checkpoint(Path::new("step20"), None, None).await?;
        let w = loaded["w"].as_tensor().expect("w is a tensor");
        assert_eq!(w.data, vec![rank as f32]);
        assert_eq!(w.device, Device::Accelerator(rank as u32));
    }

    Ok(())
}

#[tokio::test]
async fn test_save_context_snapshot() -> Result<()> {
    use checkpoint::{ContextSnapshot, Module, Orchestrator, Persistable, Recipe};
    use serde_json::json;

    struct Model;
    impl Persistable for Model {
        fn recipe(&self) -> Recipe {
            Recipe::new("models.Llama", json!({ "layers": 2 }))
        }
    }
    impl Module for Model {
        fn persistable(&self) -> Option<&dyn Persistable> {
            Some(self)
        }
    }

    struct Trainer {
        model: Model,
    }
    impl Persistable for Trainer {
        fn recipe(&self) -> Recipe {
            Recipe::new("Trainer", json!({ "max_steps": 100 }))
        }
    }
    impl Orchestrator for Trainer {
        fn model(&self) -> &dyn Module {
            &self.model
        }
        fn persistable(&self) -> Option<&dyn Persistable> {
            Some(self)
        }
    }

    let temp_dir = tempfile::tempdir()?;
    let storage = Arc::new(LocalStorage::new(temp_dir.path()));
    let backend = FileShardBackend::new(storage.clone(), 0, 1, ShardEncoding::Bincode)?;
    let store = CheckpointStore::new(
        SaveStrategy::new("torch_dist", 1),
        storage,
        Arc::new(backend),
        Arc::new(LocalAccelerator::new(0)),
    );

    let trainer = Trainer { model: Model };
    let context = ContextSnapshot::from_orchestrator(&trainer)?.to_state_dict();
    store
        .save_checkpoint(&context, Path::new("context.ckpt"), None)
        .await?;

    let loaded = store.load_checkpoint(Path::new("context"), None, None).await?;
    assert_eq!(loaded, context);
    Ok(())
}

#[tokio::test]
async fn test_store_from_runtime_config() -> Result<()> {
    use ckpt_core::RuntimeConfig;

    let temp_dir = tempfile::tempdir()?;
    let json = serde_json::json!({
        "checkpoint": { "save_format": "format-B", "replication": 2, "encoding": "json" },
        "storage": { "backend": "Local", "base_path": temp_dir.path() },
    })
    .to_string();
    let config = RuntimeConfig::from_json_str(&json)?;

    let storage = storage::from_config(&config.storage).await?;
    let backend = FileShardBackend::from_config(storage.clone(), &config.checkpoint)?;
    let store = CheckpointStore::new(
        config.checkpoint.strategy(),
        storage,
        Arc::new(backend),
        Arc::new(LocalAccelerator::new(0)),
    );
    assert_eq!(store.strategy(), &SaveStrategy::new("format-B", 2));

    let mut payload = StateDict::new();
    payload.insert("w".to_string(), shard_tensor().into());
    store
        .save_checkpoint(&payload, Path::new("step1.ckpt"), None)
        .await?;

    let shard = std::fs::read(temp_dir.path().join("step1/shard-00000.bin"))?;
    assert!(serde_json::from_slice::<serde_json::Value>(&shard).is_ok());
    assert!(store.is_distributed_checkpoint(Path::new("step1")).await?);
    Ok(())
}
