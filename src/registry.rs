//! Named resources (accounts, items) that transactions lock and version.
//!
//! Identity is fixed at registration: ids are handed out from 1 in
//! registration order and never reused. Only the current value changes during
//! a run, and `reset` brings every resource back to its registration value.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TxnLabError};
use crate::core::{ResourceId, Value};

/// A resource as it is declared in a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub value: Value,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Point-in-time view of one resource, as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceState {
    pub id: ResourceId,
    pub name: String,
    pub value: Value,
}

#[derive(Debug)]
struct Slot {
    id: ResourceId,
    name: String,
    baseline: Value,
    current: Mutex<Value>,
}

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    slots: Vec<Slot>,
    by_name: HashMap<String, ResourceId>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs<'a, I>(specs: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a ResourceSpec>,
    {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec.name.clone(), spec.value)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, name: impl Into<String>, value: Value) -> Result<ResourceId> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(TxnLabError::DuplicateResource(name));
        }
        let id = self.slots.len() as ResourceId + 1;
        self.by_name.insert(name.clone(), id);
        self.slots.push(Slot {
            id,
            name,
            baseline: value,
            current: Mutex::new(value),
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.slots.iter().map(|slot| slot.id)
    }

    fn slot(&self, id: ResourceId) -> Result<&Slot> {
        id.checked_sub(1)
            .and_then(|idx| self.slots.get(idx as usize))
            .ok_or_else(|| TxnLabError::UnknownResource(format!("#{id}")))
    }

    pub fn resolve(&self, name: &str) -> Result<ResourceId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| TxnLabError::UnknownResource(name.to_string()))
    }

    pub fn name(&self, id: ResourceId) -> Result<&str> {
        Ok(self.slot(id)?.name.as_str())
    }

    pub fn value(&self, id: ResourceId) -> Result<Value> {
        Ok(*self.slot(id)?.current.lock())
    }

    pub fn baseline(&self, id: ResourceId) -> Result<Value> {
        Ok(self.slot(id)?.baseline)
    }

    pub fn set_value(&self, id: ResourceId, value: Value) -> Result<()> {
        *self.slot(id)?.current.lock() = value;
        Ok(())
    }

    /// Restore every resource to the value it was registered with.
    pub fn reset(&self) {
        for slot in &self.slots {
            *slot.current.lock() = slot.baseline;
        }
    }

    pub fn snapshot(&self) -> Vec<ResourceState> {
        self.slots
            .iter()
            .map(|slot| ResourceState {
                id: slot.id,
                name: slot.name.clone(),
                value: *slot.current.lock(),
            })
            .collect()
    }
}
