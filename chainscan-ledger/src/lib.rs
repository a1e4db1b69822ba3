//! Read-only access to an append-only ledger of blocks, transactions,
//! inputs, outputs and addresses.
//!
//! [`Chain`] is the accessor every process opens for itself from a
//! [`LedgerDescriptor`]; entity handles ([`Block`], [`Tx`], [`Output`],
//! [`Input`], [`Address`], [`EquivAddress`]) are views into one open chain.
pub mod access;
pub mod chain;
pub mod descriptor;
pub mod entity;
pub mod equiv;
pub mod error;
pub mod fixtures;
pub mod record;
pub mod store;

pub use access::{LedgerAccess, TxLocation};
pub use chain::{BlockRange, Chain};
pub use descriptor::LedgerDescriptor;
pub use entity::{Address, Block, Entity, EquivAddress, Input, Output, Tx};
pub use error::LedgerError;
pub use record::{AddressKey, AddressRecord, AddressType, BlockRecord};
pub use store::{FileLedger, LedgerWriter};
