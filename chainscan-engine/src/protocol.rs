//! Entity-reference serialization.
//!
//! Results travel between processes as JSON. Plain data is copied
//! structurally; every entity is replaced by an [`EntityReference`] on the way
//! out and resolved against the receiving process's own [`Chain`] on the way
//! in. Both sides must have opened the ledger from the same descriptor.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chainscan_ledger::{AddressType, Chain, Entity};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ResolutionError, SerializationError};
use crate::value::Value;

/// Compact, process-independent key of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityReference {
    Block {
        height: u64,
    },
    Transaction {
        index: u64,
    },
    Output {
        tx_index: u64,
        output_index: u32,
    },
    Input {
        tx_index: u64,
        input_index: u32,
    },
    Address {
        address_num: u32,
        address_type: AddressType,
    },
    EquivAddress {
        sample_address_num: u32,
        sample_address_type: AddressType,
        is_script_equivalence: bool,
    },
}

impl EntityReference {
    /// Reference for `entity`.
    ///
    /// An equivalence class is represented by its lowest member, so only a set
    /// that is exactly the class of that member can be referenced.
    pub fn of(entity: &Entity) -> Result<Self, SerializationError> {
        let reference = match entity {
            Entity::Block(block) => EntityReference::Block {
                height: block.height(),
            },
            Entity::Tx(tx) => EntityReference::Transaction { index: tx.index() },
            Entity::Output(output) => EntityReference::Output {
                tx_index: output.tx_index(),
                output_index: output.index(),
            },
            Entity::Input(input) => EntityReference::Input {
                tx_index: input.tx_index(),
                input_index: input.index(),
            },
            Entity::Address(address) => EntityReference::Address {
                address_num: address.address_num(),
                address_type: address.address_type(),
            },
            Entity::EquivAddress(equiv) => {
                let sample = equiv.sample().ok_or_else(|| {
                    SerializationError::UnsupportedValue(
                        "equivalence address with no members".to_string(),
                    )
                })?;
                if !equiv.is_complete_class() {
                    return Err(SerializationError::UnsupportedValue(format!(
                        "address set of {} members is not the complete class of {} {}",
                        equiv.len(),
                        sample.address_type(),
                        sample.address_num()
                    )));
                }
                EntityReference::EquivAddress {
                    sample_address_num: sample.address_num(),
                    sample_address_type: sample.address_type(),
                    is_script_equivalence: equiv.is_script_equiv(),
                }
            }
        };
        Ok(reference)
    }

    pub fn resolve(&self, chain: &Chain) -> Result<Entity, ResolutionError> {
        let resolved = match *self {
            EntityReference::Block { height } => chain.block_at(height).map(Entity::from),
            EntityReference::Transaction { index } => {
                chain.transaction_at(index).map(Entity::from)
            }
            EntityReference::Output {
                tx_index,
                output_index,
            } => chain.output_at(tx_index, output_index).map(Entity::from),
            EntityReference::Input {
                tx_index,
                input_index,
            } => chain.input_at(tx_index, input_index).map(Entity::from),
            EntityReference::Address {
                address_num,
                address_type,
            } => chain.address_at(address_num, address_type).map(Entity::from),
            EntityReference::EquivAddress {
                sample_address_num,
                sample_address_type,
                is_script_equivalence,
            } => chain
                .equiv_address_at(sample_address_num, sample_address_type, is_script_equivalence)
                .map(Entity::from),
        };
        resolved.map_err(|source| ResolutionError::Unresolvable {
            reference: *self,
            source,
        })
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityReference::Block { height } => write!(f, "Block({height})"),
            EntityReference::Transaction { index } => write!(f, "Transaction({index})"),
            EntityReference::Output {
                tx_index,
                output_index,
            } => write!(f, "Output({tx_index}, {output_index})"),
            EntityReference::Input {
                tx_index,
                input_index,
            } => write!(f, "Input({tx_index}, {input_index})"),
            EntityReference::Address {
                address_num,
                address_type,
            } => write!(f, "Address({address_num}, {address_type})"),
            EntityReference::EquivAddress {
                sample_address_num,
                sample_address_type,
                is_script_equivalence,
            } => write!(
                f,
                "EquivAddress({sample_address_num}, {sample_address_type}, {is_script_equivalence})"
            ),
        }
    }
}

/// Deepest container nesting the codec accepts. A level costs the decoder up
/// to three of serde_json's 128 recursion levels.
pub const MAX_NESTING: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
enum Wire {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    List(Vec<Wire>),
    Tuple(Vec<Wire>),
    Map(Vec<(String, Wire)>),
    Ref(EntityReference),
}

/// Counters of protocol activity, shared by everything holding the codec.
#[derive(Debug, Default)]
pub struct ProtocolStats {
    encodes: AtomicU64,
    decodes: AtomicU64,
    references_emitted: AtomicU64,
    references_resolved: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub encodes: u64,
    pub decodes: u64,
    pub references_emitted: u64,
    pub references_resolved: u64,
}

impl StatsSnapshot {
    pub fn invocations(&self) -> u64 {
        self.encodes + self.decodes
    }
}

impl ProtocolStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            encodes: self.encodes.load(Ordering::Relaxed),
            decodes: self.decodes.load(Ordering::Relaxed),
            references_emitted: self.references_emitted.load(Ordering::Relaxed),
            references_resolved: self.references_resolved.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityCodec {
    stats: Arc<ProtocolStats>,
}

impl EntityCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stats(stats: Arc<ProtocolStats>) -> Self {
        Self { stats }
    }

    pub fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        self.stats.encodes.fetch_add(1, Ordering::Relaxed);
        let mut references = 0;
        let wire = to_wire(value, 0, &mut references)?;
        self.stats
            .references_emitted
            .fetch_add(references, Ordering::Relaxed);
        Ok(serde_json::to_vec(&wire)?)
    }

    pub fn decode(&self, bytes: &[u8], chain: &Chain) -> Result<Value, ResolutionError> {
        self.stats.decodes.fetch_add(1, Ordering::Relaxed);
        let wire: Wire = serde_json::from_slice(bytes)?;
        let mut references = 0;
        let value = from_wire(wire, chain, &mut references)?;
        self.stats
            .references_resolved
            .fetch_add(references, Ordering::Relaxed);
        Ok(value)
    }
}

fn to_wire(value: &Value, depth: usize, references: &mut u64) -> Result<Wire, SerializationError> {
    if depth >= MAX_NESTING && matches!(value, Value::List(_) | Value::Tuple(_) | Value::Map(_)) {
        return Err(SerializationError::UnsupportedValue(format!(
            "containers nested deeper than {MAX_NESTING} levels"
        )));
    }
    let wire = match value {
        Value::Null => Wire::Null,
        Value::Bool(b) => Wire::Bool(*b),
        Value::Int(v) => Wire::Int(*v),
        Value::UInt(v) => Wire::UInt(*v),
        Value::Float(v) if v.is_finite() => Wire::Float(*v),
        Value::Float(v) => {
            return Err(SerializationError::UnsupportedValue(format!(
                "non-finite float {v}"
            )))
        }
        Value::Str(s) => Wire::Str(s.clone()),
        Value::List(items) => Wire::List(
            items
                .iter()
                .map(|item| to_wire(item, depth + 1, references))
                .collect::<Result<_, _>>()?,
        ),
        Value::Tuple(items) => Wire::Tuple(
            items
                .iter()
                .map(|item| to_wire(item, depth + 1, references))
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(map) => Wire::Map(
            map.iter()
                .map(|(key, item)| Ok((key.clone(), to_wire(item, depth + 1, references)?)))
                .collect::<Result<_, SerializationError>>()?,
        ),
        Value::Entity(entity) => {
            *references += 1;
            Wire::Ref(EntityReference::of(entity)?)
        }
    };
    Ok(wire)
}

fn from_wire(wire: Wire, chain: &Chain, references: &mut u64) -> Result<Value, ResolutionError> {
    let value = match wire {
        Wire::Null => Value::Null,
        Wire::Bool(b) => Value::Bool(b),
        Wire::Int(v) => Value::Int(v),
        Wire::UInt(v) => Value::UInt(v),
        Wire::Float(v) => Value::Float(v),
        Wire::Str(s) => Value::Str(s),
        Wire::List(items) => Value::List(
            items
                .into_iter()
                .map(|item| from_wire(item, chain, references))
                .collect::<Result<_, _>>()?,
        ),
        Wire::Tuple(items) => Value::Tuple(
            items
                .into_iter()
                .map(|item| from_wire(item, chain, references))
                .collect::<Result<_, _>>()?,
        ),
        Wire::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(key, item)| Ok((key, from_wire(item, chain, references)?)))
                .collect::<Result<IndexMap<_, _>, ResolutionError>>()?,
        ),
        Wire::Ref(reference) => {
            *references += 1;
            Value::Entity(reference.resolve(chain)?)
        }
    };
    Ok(value)
}
