//! Post-load device placement
//!
//! A checkpoint restored on a different process layout than the one that
//! wrote it can hand back tensors on the writer's accelerator index. The
//! fixup moves every such tensor onto this process's current device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ckpt_core::{map_state_dict, Device, DeviceIndex, Error, Result, StateDict, Tensor};
use tracing::debug;

/// Environment variable launchers set to the process's local rank
pub const LOCAL_RANK_ENV: &str = "LOCAL_RANK";

/// The accelerator runtime of the current process
pub trait Accelerator: Send + Sync {
    /// Whether the runtime has been initialized in this process
    fn is_initialized(&self) -> bool;

    /// Index of the device assigned to this process
    fn current_device(&self) -> DeviceIndex;

    /// Copy `tensor` onto `device`
    fn transfer(&self, tensor: &Tensor, device: Device) -> Result<Tensor> {
        Ok(Tensor {
            device,
            ..tensor.clone()
        })
    }
}

/// Accelerator bound to a fixed device index
#[derive(Debug)]
pub struct LocalAccelerator {
    device: DeviceIndex,
    initialized: AtomicBool,
}

impl LocalAccelerator {
    /// An initialized accelerator on `device`
    pub fn new(device: DeviceIndex) -> Self {
        Self {
            device,
            initialized: AtomicBool::new(true),
        }
    }

    /// An accelerator whose runtime has not been brought up yet
    pub fn uninitialized(device: DeviceIndex) -> Self {
        Self {
            device,
            initialized: AtomicBool::new(false),
        }
    }

    /// Device from `LOCAL_RANK`, defaulting to 0
    pub fn from_env() -> Result<Self> {
        match std::env::var(LOCAL_RANK_ENV) {
            Ok(value) => value
                .trim()
                .parse()
                .map(Self::new)
                .map_err(|e| Error::InvalidConfig {
                    message: format!("{}={:?} is not a device index: {}", LOCAL_RANK_ENV, value, e),
                }),
            Err(_) => Ok(Self::new(0)),
        }
    }

    /// Mark the runtime as initialized
    pub fn initialize(&self) {
        self.initialized.store(true, Ordering::Release);
    }
}

impl Accelerator for LocalAccelerator {
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn current_device(&self) -> DeviceIndex {
        self.device
    }
}

/// Relocates loaded tensors onto the current process's accelerator
#[derive(Clone)]
pub struct DeviceFixup {
    accelerator: Arc<dyn Accelerator>,
}

impl DeviceFixup {
    pub fn new(accelerator: Arc<dyn Accelerator>) -> Self {
        Self { accelerator }
    }

    /// Out-of-place relocation of every misplaced accelerator tensor.
    ///
    /// CPU tensors, tensors already on the current device and non-tensor
    /// leaves pass through unchanged.
    pub fn relocate(&self, payload: &StateDict) -> Result<StateDict> {
        if !self.accelerator.is_initialized() {
            return Err(Error::AcceleratorNotInitialized);
        }

        let current = Device::Accelerator(self.accelerator.current_device());
        let mut moved = 0usize;
        let relocated = map_state_dict(payload, &mut |tensor: &Tensor| {
            if tensor.device.is_accelerator() && tensor.device != current {
                moved += 1;
                self.accelerator.transfer(tensor, current)
            } else {
                Ok(tensor.clone())
            }
        })?;

        if moved > 0 {
            debug!(moved, device = %current, "Relocated checkpoint tensors");
        }
        Ok(relocated)
    }
}
