//! Core type definitions for checkpoint payloads

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::Result;

/// A checkpoint payload: string keys to nested state values
pub type StateDict = BTreeMap<String, StateValue>;

/// Accelerator index within the current host
pub type DeviceIndex = u32;

/// Where a tensor's storage lives
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Device {
    /// Host memory
    Cpu,

    /// Accelerator memory on the given device index
    Accelerator(DeviceIndex),
}

impl Device {
    /// Returns true if the tensor lives on an accelerator
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Device::Accelerator(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator(index) => write!(f, "accel:{}", index),
        }
    }
}

/// How a logically whole tensor is split across processes
///
/// Owned by the sharded backend; checkpoint I/O only carries it around.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardingInfo {
    /// Shape of the full, unsharded tensor
    pub global_shape: Vec<usize>,

    /// Offset of this shard within the full tensor
    pub global_offset: Vec<usize>,

    /// Replica index for replicated shards
    pub replica_id: u32,
}

/// Tensor-like leaf of a payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tensor {
    /// Local shape
    pub shape: Vec<usize>,

    /// Row-major values
    pub data: Vec<f32>,

    /// Current placement
    pub device: Device,

    /// Sharding metadata, if the tensor is a shard of a larger one
    pub sharding: Option<ShardingInfo>,
}

impl Tensor {
    /// Create an unsharded tensor
    pub fn new(shape: Vec<usize>, data: Vec<f32>, device: Device) -> Self {
        Self {
            shape,
            data,
            device,
            sharding: None,
        }
    }

    /// Attach sharding metadata
    pub fn with_sharding(mut self, sharding: ShardingInfo) -> Self {
        self.sharding = Some(sharding);
        self
    }
}

/// A value in a checkpoint payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StateValue {
    Tensor(Tensor),
    Map(StateDict),
    List(Vec<StateValue>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
}

impl StateValue {
    /// Out-of-place map over every tensor leaf.
    ///
    /// Maps and lists are rebuilt with the same structure; non-tensor leaves
    /// are cloned unchanged.
    pub fn map_tensors<F>(&self, f: &mut F) -> Result<StateValue>
    where
        F: FnMut(&Tensor) -> Result<Tensor>,
    {
        Ok(match self {
            StateValue::Tensor(t) => StateValue::Tensor(f(t)?),
            StateValue::Map(map) => StateValue::Map(map_state_dict(map, f)?),
            StateValue::List(items) => StateValue::List(
                items
                    .iter()
                    .map(|item| item.map_tensors(f))
                    .collect::<Result<Vec<_>>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Visit every tensor leaf
    pub fn for_each_tensor<F>(&self, f: &mut F)
    where
        F: FnMut(&Tensor),
    {
        match self {
            StateValue::Tensor(t) => f(t),
            StateValue::Map(map) => map.values().for_each(|v| v.for_each_tensor(f)),
            StateValue::List(items) => items.iter().for_each(|v| v.for_each_tensor(f)),
            _ => {}
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            StateValue::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&StateDict> {
        match self {
            StateValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

/// Out-of-place map over every tensor leaf of a state dict
pub fn map_state_dict<F>(dict: &StateDict, f: &mut F) -> Result<StateDict>
where
    F: FnMut(&Tensor) -> Result<Tensor>,
{
    dict.iter()
        .map(|(key, value)| Ok((key.clone(), value.map_tensors(f)?)))
        .collect()
}

impl From<Tensor> for StateValue {
    fn from(t: Tensor) -> Self {
        StateValue::Tensor(t)
    }
}

impl From<StateDict> for StateValue {
    fn from(m: StateDict) -> Self {
        StateValue::Map(m)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Int(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Float(v)
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        StateValue::Bool(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::Str(v.to_string())
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        StateValue::Str(v)
    }
}

impl From<serde_json::Value> for StateValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => StateValue::Null,
            Value::Bool(b) => StateValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => StateValue::Int(i),
                None => StateValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => StateValue::Str(s),
            Value::Array(items) => {
                StateValue::List(items.into_iter().map(StateValue::from).collect())
            }
            Value::Object(map) => StateValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, StateValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Save strategy descriptor: format tag plus replication fan-out
///
/// Fixed when a checkpoint store is built and reused for every save.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SaveStrategy {
    /// Backend format tag (e.g. "torch_dist")
    pub format: String,

    /// Replication factor for written shards
    pub replication: u32,
}

impl SaveStrategy {
    pub fn new(format: impl Into<String>, replication: u32) -> Self {
        Self {
            format: format.into(),
            replication,
        }
    }
}

impl fmt::Display for SaveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "('{}', {})", self.format, self.replication)
    }
}
