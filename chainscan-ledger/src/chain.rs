use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::access::LedgerAccess;
use crate::descriptor::LedgerDescriptor;
use crate::entity::{Address, Block, EquivAddress, Input, Output, Tx};
use crate::error::LedgerError;
use crate::record::{AddressKey, AddressType};
use crate::store::FileLedger;

/// Cheap, cloneable handle to one process's open view of a ledger.
///
/// Two chains are equal when they were opened from the same descriptor,
/// whichever process opened them.
#[derive(Clone)]
pub struct Chain {
    access: Arc<dyn LedgerAccess>,
}

impl Chain {
    pub fn new(access: Arc<dyn LedgerAccess>) -> Self {
        Self { access }
    }

    /// Opens the store named by `descriptor`, bounded by `descriptor.bound`.
    pub fn open(descriptor: &LedgerDescriptor) -> Result<Self, LedgerError> {
        Ok(Self::new(Arc::new(FileLedger::open(descriptor)?)))
    }

    /// Opens every complete block currently in the store at `location`.
    pub fn open_latest(location: impl AsRef<Path>) -> Result<Self, LedgerError> {
        Ok(Self::new(Arc::new(FileLedger::open_latest(location)?)))
    }

    pub(crate) fn access(&self) -> &dyn LedgerAccess {
        self.access.as_ref()
    }

    pub fn descriptor(&self) -> &LedgerDescriptor {
        self.access.descriptor()
    }

    pub fn len(&self) -> u64 {
        self.access.block_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tx_count(&self) -> u64 {
        self.access.tx_count()
    }

    /// Blocks in `[start, end)`.
    pub fn slice(&self, start: u64, end: u64) -> Result<BlockRange, LedgerError> {
        let len = self.len();
        if start > end || end > len {
            return Err(LedgerError::InvalidRange { start, end, len });
        }
        Ok(BlockRange {
            chain: self.clone(),
            start,
            end,
        })
    }

    pub fn blocks(&self) -> BlockRange {
        BlockRange {
            chain: self.clone(),
            start: 0,
            end: self.len(),
        }
    }

    pub fn block_at(&self, height: u64) -> Result<Block, LedgerError> {
        let len = self.len();
        if height >= len {
            return Err(LedgerError::BlockOutOfRange { height, len });
        }
        Ok(Block::new(self.clone(), height))
    }

    pub fn transaction_at(&self, index: u64) -> Result<Tx, LedgerError> {
        let location = self.access.tx(index).ok_or(LedgerError::TxOutOfRange {
            index,
            count: self.tx_count(),
        })?;
        Ok(Tx::new(self.clone(), index, location.height))
    }

    pub fn output_at(&self, tx_index: u64, output_index: u32) -> Result<Output, LedgerError> {
        let tx = self.transaction_at(tx_index)?;
        if output_index as usize >= tx.output_count() {
            return Err(LedgerError::OutputOutOfRange {
                tx_index,
                output_index,
            });
        }
        Ok(Output::new(self.clone(), tx_index, output_index))
    }

    pub fn input_at(&self, tx_index: u64, input_index: u32) -> Result<Input, LedgerError> {
        let tx = self.transaction_at(tx_index)?;
        if input_index as usize >= tx.input_count() {
            return Err(LedgerError::InputOutOfRange {
                tx_index,
                input_index,
            });
        }
        Ok(Input::new(self.clone(), tx_index, input_index))
    }

    pub fn address_at(
        &self,
        address_num: u32,
        address_type: AddressType,
    ) -> Result<Address, LedgerError> {
        let key = AddressKey::new(address_num, address_type);
        if self.access.address(key).is_none() {
            return Err(LedgerError::UnknownAddress {
                address_num,
                address_type,
            });
        }
        Ok(Address::new(self.clone(), key))
    }

    pub fn equiv_address_at(
        &self,
        address_num: u32,
        address_type: AddressType,
        script_equiv: bool,
    ) -> Result<EquivAddress, LedgerError> {
        Ok(self.address_at(address_num, address_type)?.equiv(script_equiv))
    }
}

impl PartialEq for Chain {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.access, &other.access) || self.descriptor() == other.descriptor()
    }
}

impl Eq for Chain {}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("descriptor", self.descriptor())
            .finish()
    }
}

/// Contiguous run of blocks `[start, end)` of one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRange {
    chain: Chain,
    start: u64,
    end: u64,
}

impl BlockRange {
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Block at `offset` from the start of the range.
    pub fn get(&self, offset: u64) -> Option<Block> {
        (offset < self.len()).then(|| Block::new(self.chain.clone(), self.start + offset))
    }

    pub fn iter(&self) -> impl Iterator<Item = Block> + '_ {
        (self.start..self.end).map(move |height| Block::new(self.chain.clone(), height))
    }

    /// Every transaction of every block in the range, in ledger order.
    pub fn txes(&self) -> impl Iterator<Item = Tx> + '_ {
        self.iter().flat_map(|block| block.txes().collect::<Vec<_>>())
    }
}
