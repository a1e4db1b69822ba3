use std::path::PathBuf;

use crate::record::AddressType;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to access ledger store at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse block at height {height}: {source}")]
    Parse {
        height: u64,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to encode block: {0}")]
    Encode(serde_json::Error),
    #[error("Corrupt block at height {height}: {reason}")]
    Corrupt { height: u64, reason: String },
    #[error("Ledger store holds {found} blocks but the descriptor bound is {expected}")]
    Truncated { expected: u64, found: u64 },
    #[error("Block range [{start}, {end}) is invalid for a ledger of {len} blocks")]
    InvalidRange { start: u64, end: u64, len: u64 },
    #[error("Block height {height} is out of range (ledger has {len} blocks)")]
    BlockOutOfRange { height: u64, len: u64 },
    #[error("Transaction index {index} is out of range (ledger has {count} transactions)")]
    TxOutOfRange { index: u64, count: u64 },
    #[error("Transaction {tx_index} has no output {output_index}")]
    OutputOutOfRange { tx_index: u64, output_index: u32 },
    #[error("Transaction {tx_index} has no input {input_index}")]
    InputOutOfRange { tx_index: u64, input_index: u32 },
    #[error("Unknown address {address_num} of type {address_type}")]
    UnknownAddress {
        address_num: u32,
        address_type: AddressType,
    },
}
