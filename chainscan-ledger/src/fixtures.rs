//! Deterministic synthetic ledgers for tests and benchmarks.
//!
//! Block `h` holds a coinbase with three outputs and, from height 1 on, one
//! transaction spending the previous block's first coinbase output (and, from
//! height 2, the previous spend's first output). Every transaction pays a fee
//! of [`FEE`] except the coinbase.
use crate::record::{
    AddressKey, AddressRecord, AddressType, BlockRecord, InputRecord, OutputRecord, TxRecord,
};

pub const GENESIS_TIME: u64 = 1_231_006_505;
pub const BLOCK_INTERVAL: u64 = 600;
pub const FEE: u64 = 10;

/// Global index of the coinbase transaction of block `height`.
pub fn coinbase_index(height: u64) -> u64 {
    if height == 0 {
        0
    } else {
        2 * height - 1
    }
}

pub fn synthetic_blocks(count: u64) -> Vec<BlockRecord> {
    let mut blocks = Vec::with_capacity(count as usize);
    // Value of the previous block's coinbase output 0 and spend output 0.
    let mut previous: Option<(u64, Option<u64>)> = None;

    for height in 0..count {
        let reward = 5_000 + height;
        let coinbase = TxRecord {
            hash: tx_hash(height, 0),
            inputs: vec![],
            outputs: vec![
                OutputRecord {
                    value: reward,
                    address: AddressRecord::new((height % 7) as u32, AddressType::PubkeyHash),
                },
                OutputRecord {
                    value: 100,
                    address: AddressRecord::new((height % 7) as u32, AddressType::Pubkey),
                },
                OutputRecord {
                    value: 0,
                    address: AddressRecord::new(0, AddressType::Nulldata),
                },
            ],
        };

        let mut txes = vec![coinbase];
        let mut spend_out0 = None;
        if let Some((prev_coinbase, prev_spend)) = previous {
            let mut inputs = vec![InputRecord {
                tx_index: coinbase_index(height - 1),
                output_index: 0,
            }];
            let mut total = prev_coinbase;
            if let Some(prev_spend) = prev_spend {
                inputs.push(InputRecord {
                    tx_index: 2 * (height - 1),
                    output_index: 0,
                });
                total += prev_spend;
            }

            let first = total / 2;
            let second = total / 4;
            let third = total - first - second - FEE;
            let script_num = (height % 5) as u32;
            txes.push(TxRecord {
                hash: tx_hash(height, 1),
                inputs,
                outputs: vec![
                    OutputRecord {
                        value: first,
                        address: AddressRecord::new(
                            (height % 7) as u32,
                            AddressType::WitnessPubkeyHash,
                        ),
                    },
                    OutputRecord {
                        value: second,
                        address: AddressRecord::wrapping(
                            script_num,
                            AddressType::ScriptHash,
                            AddressKey::new(script_num, AddressType::WitnessPubkeyHash),
                        ),
                    },
                    OutputRecord {
                        value: third,
                        address: AddressRecord::new((height % 11) as u32, AddressType::Multisig),
                    },
                ],
            });
            spend_out0 = Some(first);
        }

        blocks.push(BlockRecord {
            hash: format!("{:064x}", 0xb10c_u64.wrapping_mul(height + 1)),
            time: GENESIS_TIME + BLOCK_INTERVAL * height,
            txes,
        });
        previous = Some((reward, spend_out0));
    }
    blocks
}

fn tx_hash(height: u64, position: u64) -> String {
    format!("{:064x}", (height << 8) | position)
}
