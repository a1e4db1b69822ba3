use std::fmt::Debug;

use crate::descriptor::LedgerDescriptor;
use crate::record::{AddressKey, AddressRecord, BlockRecord, TxRecord};

/// A transaction record together with the height of the block holding it.
#[derive(Debug, Clone, Copy)]
pub struct TxLocation<'a> {
    pub height: u64,
    pub record: &'a TxRecord,
}

/// Read-only, bounded view over a ledger store.
///
/// Every lookup is restricted to the first `descriptor().bound` blocks. An
/// implementation is opened independently in every process that needs one and
/// is never shared across a process boundary.
pub trait LedgerAccess: Debug + Send + Sync {
    fn descriptor(&self) -> &LedgerDescriptor;

    fn block_count(&self) -> u64;

    fn block(&self, height: u64) -> Option<&BlockRecord>;

    /// Global index of the first transaction in the block at `height`.
    fn first_tx_index(&self, height: u64) -> Option<u64>;

    fn tx_count(&self) -> u64;

    fn tx(&self, index: u64) -> Option<TxLocation<'_>>;

    fn address(&self, key: AddressKey) -> Option<&AddressRecord>;

    /// Members of the equivalence class of `key`, sorted. `None` if the address
    /// is unknown.
    fn equiv_class(&self, key: AddressKey, script_equiv: bool) -> Option<Vec<AddressKey>>;
}
