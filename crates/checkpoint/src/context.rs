//! Trainer context captured alongside a checkpoint
//!
//! Only collaborators that opt in through [`Persistable`] can be captured.
//! The snapshot is built immediately before a save and dropped afterwards.

use std::collections::BTreeMap;

use ckpt_core::{Error, Result, StateDict, StateValue};
use serde::{Deserialize, Serialize};

/// Key under which an attached data module's recipe is stored
pub const DATAMODULE_KEY: &str = "datamodule";

/// How to reconstruct an object: its type plus constructor arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    /// Fully qualified type name
    pub target: String,

    /// Constructor arguments
    pub args: serde_json::Value,
}

impl Recipe {
    pub fn new(target: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            target: target.into(),
            args,
        }
    }

    fn to_state_value(&self) -> StateValue {
        let mut map = StateDict::new();
        map.insert("target".to_string(), self.target.clone().into());
        map.insert("args".to_string(), StateValue::from(self.args.clone()));
        StateValue::Map(map)
    }
}

/// Capability of exposing a construction recipe
pub trait Persistable {
    fn recipe(&self) -> Recipe;
}

/// A model or data module attached to an orchestrator
pub trait Module {
    /// The persistable view of this module, if it opted in
    fn persistable(&self) -> Option<&dyn Persistable> {
        None
    }
}

/// The object driving training: owns the model and, optionally, a data module
pub trait Orchestrator {
    fn model(&self) -> &dyn Module;

    fn data_module(&self) -> Option<&dyn Module> {
        None
    }

    /// The persistable view of the orchestrator itself, if it opted in
    fn persistable(&self) -> Option<&dyn Persistable> {
        None
    }
}

/// Model, orchestrator and named extras bundled for one save
pub struct ContextSnapshot<'a> {
    model: &'a dyn Persistable,
    trainer: &'a dyn Persistable,
    extra: BTreeMap<String, Recipe>,
}

impl<'a> ContextSnapshot<'a> {
    /// Capture the persistable context of `orchestrator`.
    ///
    /// Both the orchestrator and its model must be persistable; a data
    /// module is captured under [`DATAMODULE_KEY`] only when it is.
    pub fn from_orchestrator(orchestrator: &'a dyn Orchestrator) -> Result<Self> {
        let trainer = orchestrator
            .persistable()
            .ok_or_else(|| Error::MissingCapability {
                component: "orchestrator".to_string(),
            })?;
        let model = orchestrator
            .model()
            .persistable()
            .ok_or_else(|| Error::MissingCapability {
                component: "model".to_string(),
            })?;

        Ok(Self {
            model,
            trainer,
            extra: Self::construct_extra(orchestrator),
        })
    }

    fn construct_extra(orchestrator: &dyn Orchestrator) -> BTreeMap<String, Recipe> {
        let mut extra = BTreeMap::new();
        if let Some(data) = orchestrator.data_module().and_then(|m| m.persistable()) {
            extra.insert(DATAMODULE_KEY.to_string(), data.recipe());
        }
        extra
    }

    pub fn model(&self) -> Recipe {
        self.model.recipe()
    }

    pub fn trainer(&self) -> Recipe {
        self.trainer.recipe()
    }

    pub fn extra(&self) -> &BTreeMap<String, Recipe> {
        &self.extra
    }

    /// Render as a payload (`model`, `trainer`, `extra`) for a checkpoint store
    pub fn to_state_dict(&self) -> StateDict {
        let mut dict = StateDict::new();
        dict.insert("model".to_string(), self.model().to_state_value());
        dict.insert("trainer".to_string(), self.trainer().to_state_value());
        dict.insert(
            "extra".to_string(),
            StateValue::Map(
                self.extra
                    .iter()
                    .map(|(k, recipe)| (k.clone(), recipe.to_state_value()))
                    .collect(),
            ),
        );
        dict
    }
}
