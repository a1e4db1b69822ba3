//! Raw records as they are stored, one block per line.
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Pubkey,
    PubkeyHash,
    WitnessPubkeyHash,
    Multisig,
    ScriptHash,
    WitnessScriptHash,
    Nulldata,
    Nonstandard,
}

impl AddressType {
    /// Addresses of these types with the same number share one public key.
    pub fn is_pubkey_family(self) -> bool {
        matches!(
            self,
            AddressType::Pubkey | AddressType::PubkeyHash | AddressType::WitnessPubkeyHash
        )
    }

    pub fn is_script_hash(self) -> bool {
        matches!(
            self,
            AddressType::ScriptHash | AddressType::WitnessScriptHash
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            AddressType::Pubkey => "pubkey",
            AddressType::PubkeyHash => "pubkey_hash",
            AddressType::WitnessPubkeyHash => "witness_pubkey_hash",
            AddressType::Multisig => "multisig",
            AddressType::ScriptHash => "script_hash",
            AddressType::WitnessScriptHash => "witness_script_hash",
            AddressType::Nulldata => "nulldata",
            AddressType::Nonstandard => "nonstandard",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressKey {
    pub num: u32,
    #[serde(rename = "type")]
    pub address_type: AddressType,
}

impl AddressKey {
    pub fn new(num: u32, address_type: AddressType) -> Self {
        Self { num, address_type }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub num: u32,
    #[serde(rename = "type")]
    pub address_type: AddressType,
    /// For script-hash addresses: the address whose script this one wraps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wraps: Option<AddressKey>,
}

impl AddressRecord {
    pub fn new(num: u32, address_type: AddressType) -> Self {
        Self {
            num,
            address_type,
            wraps: None,
        }
    }

    pub fn wrapping(num: u32, address_type: AddressType, wrapped: AddressKey) -> Self {
        Self {
            num,
            address_type,
            wraps: Some(wrapped),
        }
    }

    pub fn key(&self) -> AddressKey {
        AddressKey::new(self.num, self.address_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub value: u64,
    pub address: AddressRecord,
}

/// Points at the output being spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    pub tx_index: u64,
    pub output_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub hash: String,
    #[serde(default)]
    pub inputs: Vec<InputRecord>,
    pub outputs: Vec<OutputRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: String,
    pub time: u64,
    pub txes: Vec<TxRecord>,
}
