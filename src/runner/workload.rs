use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TxnLabError};
use crate::core::{ResourceId, TxnId, Value, TXN_NONE};
use crate::registry::{ResourceRegistry, ResourceSpec};

/// Concurrency-control protocol a workload runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "2PL")]
    TwoPhaseLocking,
    #[serde(rename = "MVCC")]
    Mvcc,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::TwoPhaseLocking => f.write_str("2PL"),
            Protocol::Mvcc => f.write_str("MVCC"),
        }
    }
}

impl FromStr for Protocol {
    type Err = TxnLabError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "2pl" | "two_phase_locking" => Ok(Protocol::TwoPhaseLocking),
            "mvcc" => Ok(Protocol::Mvcc),
            other => Err(TxnLabError::InvalidWorkload(format!("unknown protocol: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Read,
    Write,
}

/// One operation intent of a transaction script. Writes carry a signed delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Op {
    #[serde(rename = "type")]
    pub kind: OpKind,
    #[serde(alias = "item")]
    pub resource: String,
    #[serde(default, alias = "value_change", skip_serializing_if = "Option::is_none")]
    pub delta: Option<Value>,
}

impl Op {
    pub fn read(resource: impl Into<String>) -> Self {
        Self {
            kind: OpKind::Read,
            resource: resource.into(),
            delta: None,
        }
    }

    pub fn write(resource: impl Into<String>, delta: Value) -> Self {
        Self {
            kind: OpKind::Write,
            resource: resource.into(),
            delta: Some(delta),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnScript {
    pub id: TxnId,
    pub ops: Vec<Op>,
}

impl TxnScript {
    pub fn new(id: TxnId, ops: Vec<Op>) -> Self {
        Self { id, ops }
    }
}

/// Resources plus the transactions to run against them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub resources: Vec<ResourceSpec>,
    pub transactions: Vec<TxnScript>,
}

impl Workload {
    pub fn new(resources: Vec<ResourceSpec>, transactions: Vec<TxnScript>) -> Self {
        Self {
            resources,
            transactions,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn registry(&self) -> Result<ResourceRegistry> {
        ResourceRegistry::from_specs(&self.resources)
    }

    /// Check the workload against its own resource list.
    pub fn validate(&self) -> Result<()> {
        resolve_scripts(&self.registry()?, &self.transactions).map(|_| ())
    }
}

/// An intent with its resource resolved to an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Intent {
    pub kind: OpKind,
    pub resource: ResourceId,
    pub name: String,
    pub delta: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedScript {
    pub id: TxnId,
    pub intents: Vec<Intent>,
}

/// Validate scripts and resolve resource names.
///
/// Rejects reserved or duplicate transaction ids, unknown resources, writes
/// without a delta and reads with one.
pub(crate) fn resolve_scripts(
    registry: &ResourceRegistry,
    scripts: &[TxnScript],
) -> Result<Vec<ResolvedScript>> {
    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(scripts.len());
    for script in scripts {
        if script.id == TXN_NONE {
            return Err(TxnLabError::InvalidWorkload(format!(
                "transaction id {TXN_NONE} is reserved"
            )));
        }
        if !seen.insert(script.id) {
            return Err(TxnLabError::DuplicateTransaction(script.id));
        }
        let mut intents = Vec::with_capacity(script.ops.len());
        for (idx, op) in script.ops.iter().enumerate() {
            let resource = registry.resolve(&op.resource)?;
            let delta = match (op.kind, op.delta) {
                (OpKind::Write, Some(delta)) => delta,
                (OpKind::Write, None) => {
                    return Err(TxnLabError::InvalidWorkload(format!(
                        "T{} op {idx}: write to {} has no delta",
                        script.id, op.resource
                    )))
                }
                (OpKind::Read, None) => 0,
                (OpKind::Read, Some(_)) => {
                    return Err(TxnLabError::InvalidWorkload(format!(
                        "T{} op {idx}: read of {} carries a delta",
                        script.id, op.resource
                    )))
                }
            };
            intents.push(Intent {
                kind: op.kind,
                resource,
                name: op.resource.clone(),
                delta,
            });
        }
        resolved.push(ResolvedScript {
            id: script.id,
            intents,
        });
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ResourceRegistry {
        ResourceRegistry::from_specs(&[ResourceSpec::new("Item 1", 100)]).unwrap()
    }

    #[test]
    fn accepts_item_and_value_change_aliases() {
        let json = r#"{
            "resources": [{"name": "Item 1", "value": 100}],
            "transactions": [
                {"id": 7, "ops": [
                    {"type": "read", "item": "Item 1"},
                    {"type": "write", "item": "Item 1", "value_change": -5}
                ]}
            ]
        }"#;
        let workload = Workload::from_json(json).unwrap();
        assert_eq!(
            workload.transactions[0].ops,
            vec![Op::read("Item 1"), Op::write("Item 1", -5)]
        );
        workload.validate().unwrap();
    }

    #[test]
    fn rejects_invalid_scripts() {
        let registry = registry();
        let dup = [
            TxnScript::new(1, vec![Op::read("Item 1")]),
            TxnScript::new(1, vec![]),
        ];
        assert!(matches!(
            resolve_scripts(&registry, &dup),
            Err(TxnLabError::DuplicateTransaction(1))
        ));

        let unknown = [TxnScript::new(1, vec![Op::read("Item 9")])];
        assert!(matches!(
            resolve_scripts(&registry, &unknown),
            Err(TxnLabError::UnknownResource(_))
        ));

        let mut write = Op::write("Item 1", 3);
        write.delta = None;
        assert!(matches!(
            resolve_scripts(&registry, &[TxnScript::new(1, vec![write])]),
            Err(TxnLabError::InvalidWorkload(_))
        ));

        assert!(matches!(
            resolve_scripts(&registry, &[TxnScript::new(TXN_NONE, vec![])]),
            Err(TxnLabError::InvalidWorkload(_))
        ));
    }

    #[test]
    fn protocol_names() {
        assert_eq!("2pl".parse::<Protocol>().unwrap(), Protocol::TwoPhaseLocking);
        assert_eq!("MVCC".parse::<Protocol>().unwrap(), Protocol::Mvcc);
        assert!("occ".parse::<Protocol>().is_err());
        assert_eq!(
            serde_json::to_string(&Protocol::TwoPhaseLocking).unwrap(),
            "\"2PL\""
        );
    }
}
