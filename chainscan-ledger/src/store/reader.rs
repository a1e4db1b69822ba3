use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::access::{LedgerAccess, TxLocation};
use crate::descriptor::LedgerDescriptor;
use crate::equiv::EquivIndex;
use crate::error::LedgerError;
use crate::record::{AddressKey, AddressRecord, BlockRecord};

use super::{blocks_path, stored_block_count};

/// A bounded, read-only view of a JSON-lines store, held in memory.
#[derive(Debug)]
pub struct FileLedger {
    descriptor: LedgerDescriptor,
    blocks: Vec<BlockRecord>,
    /// `tx_offsets[h]` is the global index of the first transaction of block
    /// `h`; the final entry is the total transaction count.
    tx_offsets: Vec<u64>,
    addresses: HashMap<AddressKey, AddressRecord>,
    equiv: EquivIndex,
}

impl FileLedger {
    /// Opens exactly `descriptor.bound` blocks. Blocks appended to the store
    /// after the descriptor was captured are never read.
    pub fn open(descriptor: &LedgerDescriptor) -> Result<Self, LedgerError> {
        let path = blocks_path(&descriptor.location);
        let file = File::open(&path).map_err(|source| LedgerError::Io {
            path: path.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file);

        let mut blocks = Vec::new();
        let mut line = String::new();
        while (blocks.len() as u64) < descriptor.bound {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .map_err(|source| LedgerError::Io {
                    path: path.clone(),
                    source,
                })?;
            if n == 0 || !line.ends_with('\n') {
                break;
            }
            let height = blocks.len() as u64;
            let block: BlockRecord = serde_json::from_str(line.trim_end())
                .map_err(|source| LedgerError::Parse { height, source })?;
            blocks.push(block);
        }

        if (blocks.len() as u64) < descriptor.bound {
            return Err(LedgerError::Truncated {
                expected: descriptor.bound,
                found: blocks.len() as u64,
            });
        }

        let (tx_offsets, addresses) = index_blocks(&blocks)?;
        let equiv = EquivIndex::build(&addresses);

        tracing::debug!(
            location = ?descriptor.location,
            blocks = blocks.len(),
            txes = tx_offsets.last().copied().unwrap_or(0),
            addresses = addresses.len(),
            "opened ledger store"
        );

        Ok(Self {
            descriptor: descriptor.clone(),
            blocks,
            tx_offsets,
            addresses,
            equiv,
        })
    }

    /// Opens every complete block currently in the store.
    pub fn open_latest(location: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let location = location.as_ref();
        let bound = stored_block_count(location)?;
        Self::open(&LedgerDescriptor::new(location, bound))
    }
}

fn index_blocks(
    blocks: &[BlockRecord],
) -> Result<(Vec<u64>, HashMap<AddressKey, AddressRecord>), LedgerError> {
    let mut tx_offsets = Vec::with_capacity(blocks.len() + 1);
    let mut output_counts: Vec<u32> = Vec::new();
    let mut addresses: HashMap<AddressKey, AddressRecord> = HashMap::new();

    for (height, block) in blocks.iter().enumerate() {
        let height = height as u64;
        tx_offsets.push(output_counts.len() as u64);

        for tx in &block.txes {
            let tx_index = output_counts.len() as u64;
            // Only outputs of earlier transactions are in `output_counts` yet.
            for input in &tx.inputs {
                let spendable = output_counts
                    .get(input.tx_index as usize)
                    .is_some_and(|count| input.output_index < *count);
                if !spendable {
                    return Err(LedgerError::Corrupt {
                        height,
                        reason: format!(
                            "transaction {} spends unknown output {}:{}",
                            tx_index, input.tx_index, input.output_index
                        ),
                    });
                }
            }

            for output in &tx.outputs {
                let record = &output.address;
                let entry = addresses
                    .entry(record.key())
                    .or_insert_with(|| record.clone());
                if entry.wraps.is_none() && record.wraps.is_some() {
                    entry.wraps = record.wraps;
                }
            }
            output_counts.push(tx.outputs.len() as u32);
        }
    }
    tx_offsets.push(output_counts.len() as u64);

    Ok((tx_offsets, addresses))
}

impl LedgerAccess for FileLedger {
    fn descriptor(&self) -> &LedgerDescriptor {
        &self.descriptor
    }

    fn block_count(&self) -> u64 {
        self.blocks.len() as u64
    }

    fn block(&self, height: u64) -> Option<&BlockRecord> {
        self.blocks.get(height as usize)
    }

    fn first_tx_index(&self, height: u64) -> Option<u64> {
        if height >= self.block_count() {
            return None;
        }
        self.tx_offsets.get(height as usize).copied()
    }

    fn tx_count(&self) -> u64 {
        self.tx_offsets.last().copied().unwrap_or(0)
    }

    fn tx(&self, index: u64) -> Option<TxLocation<'_>> {
        if index >= self.tx_count() {
            return None;
        }
        let height = self.tx_offsets.partition_point(|offset| *offset <= index) - 1;
        let offset = index - self.tx_offsets[height];
        let record = self.blocks[height].txes.get(offset as usize)?;
        Some(TxLocation {
            height: height as u64,
            record,
        })
    }

    fn address(&self, key: AddressKey) -> Option<&AddressRecord> {
        self.addresses.get(&key)
    }

    fn equiv_class(&self, key: AddressKey, script_equiv: bool) -> Option<Vec<AddressKey>> {
        self.equiv.class_of(&self.addresses, key, script_equiv)
    }
}
