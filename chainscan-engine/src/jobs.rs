//! Built-in jobs, linked into the stock worker binary.
use std::collections::HashSet;

use anyhow::bail;
use chainscan_ledger::{AddressKey, AddressType, Block, BlockRange, Tx};
use serde::{Deserialize, Serialize};

use crate::job::{BlockFilter, BlockMap, Fold, RangeJob, TxFilter, TxMap};
use crate::reduce;
use crate::value::Value;

/// `[height, ...]` for every block of the range.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CollectHeights;

#[typetag::serde(name = "collect_heights")]
impl RangeJob for CollectHeights {
    fn map(&self, blocks: &BlockRange) -> anyhow::Result<Value> {
        Ok(blocks.iter().map(|block| Value::from(block.height())).collect())
    }
}

/// Every output holding at least `value`, as entities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OutputsAtLeast {
    pub value: u64,
}

#[typetag::serde(name = "outputs_at_least")]
impl RangeJob for OutputsAtLeast {
    fn map(&self, blocks: &BlockRange) -> anyhow::Result<Value> {
        Ok(blocks
            .txes()
            .flat_map(|tx| tx.outputs().collect::<Vec<_>>())
            .filter(|output| output.value() >= self.value)
            .map(Value::from)
            .collect())
    }
}

/// Fails on the first block whose timestamp precedes its predecessor's.
///
/// The predecessor of the first block of a range is read from the chain, so
/// a split between two blocks does not hide a regression. Returns the number
/// of blocks checked.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CheckBlockTimes;

#[typetag::serde(name = "check_block_times")]
impl RangeJob for CheckBlockTimes {
    fn map(&self, blocks: &BlockRange) -> anyhow::Result<Value> {
        for block in blocks.iter() {
            if let Some(previous) = block.previous() {
                if block.time() < previous.time() {
                    bail!(
                        "block {} has timestamp {} before its predecessor's {}",
                        block.height(),
                        block.time(),
                        previous.time()
                    );
                }
            }
        }
        Ok(Value::from(blocks.len()))
    }
}

/// Distinct owners paid in the range, as equivalence classes in order of
/// first payment. Data-carrier outputs are skipped.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RecipientClasses {
    pub script_equiv: bool,
}

#[typetag::serde(name = "recipient_classes")]
impl RangeJob for RecipientClasses {
    fn map(&self, blocks: &BlockRange) -> anyhow::Result<Value> {
        let mut seen = HashSet::new();
        let mut classes = Vec::new();
        for tx in blocks.txes() {
            for output in tx.outputs() {
                let address = output.address();
                if address.address_type() == AddressType::Nulldata {
                    continue;
                }
                let class = address.equiv(self.script_equiv);
                if seen.insert(class.clone()) {
                    classes.push(Value::from(class));
                }
            }
        }
        Ok(Value::List(classes))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BlockHeight;

#[typetag::serde(name = "block_height")]
impl BlockMap for BlockHeight {
    fn apply(&self, block: &Block) -> anyhow::Result<Value> {
        Ok(Value::from(block.height()))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BlockTxCount;

#[typetag::serde(name = "block_tx_count")]
impl BlockMap for BlockTxCount {
    fn apply(&self, block: &Block) -> anyhow::Result<Value> {
        Ok(Value::from(block.tx_count()))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BlockTime;

#[typetag::serde(name = "block_time")]
impl BlockMap for BlockTime {
    fn apply(&self, block: &Block) -> anyhow::Result<Value> {
        Ok(Value::from(block.time()))
    }
}

/// Average value of the outputs created in the block.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MeanOutputValue;

#[typetag::serde(name = "mean_output_value")]
impl BlockMap for MeanOutputValue {
    fn apply(&self, block: &Block) -> anyhow::Result<Value> {
        let (total, count) = block.txes().fold((0u64, 0usize), |(total, count), tx| {
            (total + tx.output_value(), count + tx.output_count())
        });
        if count == 0 {
            bail!("block {} has no outputs", block.height());
        }
        Ok(Value::Float(total as f64 / count as f64))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BlockEntity;

#[typetag::serde(name = "block_entity")]
impl BlockMap for BlockEntity {
    fn apply(&self, block: &Block) -> anyhow::Result<Value> {
        Ok(Value::from(block.clone()))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TxFee;

#[typetag::serde(name = "tx_fee")]
impl TxMap for TxFee {
    fn apply(&self, tx: &Tx) -> anyhow::Result<Value> {
        Ok(Value::from(tx.fee()))
    }
}

/// Fee divided by the number of inputs. NaN for a coinbase.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TxFeePerInput;

#[typetag::serde(name = "tx_fee_per_input")]
impl TxMap for TxFeePerInput {
    fn apply(&self, tx: &Tx) -> anyhow::Result<Value> {
        Ok(Value::Float(tx.fee() as f64 / tx.input_count() as f64))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TxOutputValue;

#[typetag::serde(name = "tx_output_value")]
impl TxMap for TxOutputValue {
    fn apply(&self, tx: &Tx) -> anyhow::Result<Value> {
        Ok(Value::from(tx.output_value()))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TxEntity;

#[typetag::serde(name = "tx_entity")]
impl TxMap for TxEntity {
    fn apply(&self, tx: &Tx) -> anyhow::Result<Value> {
        Ok(Value::from(tx.clone()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MinTxCount {
    pub min: usize,
}

#[typetag::serde(name = "min_tx_count")]
impl BlockFilter for MinTxCount {
    fn matches(&self, block: &Block) -> anyhow::Result<bool> {
        Ok(block.tx_count() >= self.min)
    }
}

/// Blocks with a timestamp in `[start, end)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: u64,
    pub end: u64,
}

#[typetag::serde(name = "time_window")]
impl BlockFilter for TimeWindow {
    fn matches(&self, block: &Block) -> anyhow::Result<bool> {
        Ok((self.start..self.end).contains(&block.time()))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IsCoinbase;

#[typetag::serde(name = "is_coinbase")]
impl TxFilter for IsCoinbase {
    fn matches(&self, tx: &Tx) -> anyhow::Result<bool> {
        Ok(tx.is_coinbase())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HasOutputAtLeast {
    pub value: u64,
}

#[typetag::serde(name = "has_output_at_least")]
impl TxFilter for HasOutputAtLeast {
    fn matches(&self, tx: &Tx) -> anyhow::Result<bool> {
        Ok(tx.outputs().any(|output| output.value() >= self.value))
    }
}

/// Transactions with at least one output to the given address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PaysTo {
    pub address_num: u32,
    pub address_type: AddressType,
}

#[typetag::serde(name = "pays_to")]
impl TxFilter for PaysTo {
    fn matches(&self, tx: &Tx) -> anyhow::Result<bool> {
        let key = AddressKey::new(self.address_num, self.address_type);
        Ok(tx.outputs().any(|output| output.address().key() == key))
    }
}

/// List concatenation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Concat;

#[typetag::serde(name = "concat")]
impl Fold for Concat {
    fn fold(&self, acc: Value, next: Value) -> anyhow::Result<Value> {
        reduce::concat(acc, next)
    }
}

/// Numeric addition. Unsigned sums stay unsigned, any float makes the sum a
/// float, and overflow is an error.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Sum;

#[typetag::serde(name = "sum")]
impl Fold for Sum {
    fn fold(&self, acc: Value, next: Value) -> anyhow::Result<Value> {
        let sum = match (&acc, &next) {
            (Value::UInt(a), Value::UInt(b)) => a.checked_add(*b).map(Value::UInt),
            (Value::Float(_), _) | (_, Value::Float(_)) => match (acc.as_f64(), next.as_f64()) {
                (Some(a), Some(b)) => Some(Value::Float(a + b)),
                _ => bail!("cannot add {} and {}", acc.kind(), next.kind()),
            },
            _ => match (acc.as_i64(), next.as_i64()) {
                (Some(a), Some(b)) => a.checked_add(b).map(Value::Int),
                _ => bail!("cannot add {} and {}", acc.kind(), next.kind()),
            },
        };
        match sum {
            Some(sum) => Ok(sum),
            None => bail!("overflow adding {acc:?} and {next:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chainscan_ledger::fixtures::{coinbase_index, FEE};
    use chainscan_ledger::Entity;

    use super::*;
    use crate::test_support::sample_chain;

    #[test]
    fn check_block_times_looks_across_the_range_start() {
        let (_dir, chain) = sample_chain(6);
        assert_eq!(
            CheckBlockTimes.map(&chain.slice(2, 6).unwrap()).unwrap(),
            Value::UInt(4)
        );

        let mut blocks = chainscan_ledger::fixtures::synthetic_blocks(6);
        blocks[3].time = blocks[2].time - 1;
        let (_dir, chain) = crate::test_support::chain_from(&blocks);
        let err = CheckBlockTimes
            .map(&chain.slice(3, 6).unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("block 3"), "{err}");
        assert!(CheckBlockTimes.map(&chain.slice(4, 6).unwrap()).is_ok());
    }

    #[test]
    fn outputs_at_least_matches_direct_lookups() {
        let (_dir, chain) = sample_chain(4);
        let found = OutputsAtLeast { value: 5_000 }
            .map(&chain.slice(1, 4).unwrap())
            .unwrap()
            .into_list()
            .unwrap();
        for value in &found {
            let Some(Entity::Output(output)) = value.as_entity() else {
                panic!("expected an output, got {value:?}");
            };
            assert!(output.value() >= 5_000);
        }
        assert!(found.contains(&Value::from(chain.output_at(coinbase_index(2), 0).unwrap())));
    }

    #[test]
    fn recipient_classes_are_distinct_and_skip_data_outputs() {
        let (_dir, chain) = sample_chain(3);
        let classes = RecipientClasses { script_equiv: false }
            .map(&chain.slice(0, 1).unwrap())
            .unwrap()
            .into_list()
            .unwrap();
        // Block 0 pays PubkeyHash 0 and Pubkey 0, one owner.
        assert_eq!(classes.len(), 1);
        let Some(Entity::EquivAddress(class)) = classes[0].as_entity() else {
            panic!("expected an equivalence class");
        };
        assert!(class.contains(&chain.address_at(0, AddressType::Pubkey).unwrap()));
    }

    #[test]
    fn per_item_jobs() {
        let (_dir, chain) = sample_chain(3);
        let block = chain.block_at(2).unwrap();
        assert_eq!(BlockTxCount.apply(&block).unwrap(), Value::UInt(2));
        assert_eq!(BlockEntity.apply(&block).unwrap(), Value::from(block.clone()));
        let outputs: Vec<u64> = block
            .txes()
            .flat_map(|tx| tx.outputs().map(|o| o.value()).collect::<Vec<_>>())
            .collect();
        assert_eq!(
            MeanOutputValue.apply(&block).unwrap(),
            Value::Float(outputs.iter().sum::<u64>() as f64 / outputs.len() as f64)
        );

        let spend = block.tx(1).unwrap();
        assert_eq!(TxFee.apply(&spend).unwrap(), Value::UInt(FEE));
        assert_eq!(
            TxFeePerInput.apply(&spend).unwrap(),
            Value::Float(FEE as f64 / spend.input_count() as f64)
        );
        let coinbase = block.tx(0).unwrap();
        assert!(matches!(
            TxFeePerInput.apply(&coinbase).unwrap(),
            Value::Float(f) if f.is_nan()
        ));
        assert!(!IsCoinbase.matches(&spend).unwrap());
        assert!(PaysTo {
            address_num: 2,
            address_type: AddressType::WitnessPubkeyHash
        }
        .matches(&spend)
        .unwrap());
        assert!(TimeWindow {
            start: block.time(),
            end: block.time() + 1
        }
        .matches(&block)
        .unwrap());
    }

    #[test]
    fn sum_keeps_numeric_kinds() {
        assert_eq!(Sum.fold(Value::UInt(2), Value::UInt(3)).unwrap(), Value::UInt(5));
        assert_eq!(Sum.fold(Value::Int(-2), Value::UInt(3)).unwrap(), Value::Int(1));
        assert_eq!(
            Sum.fold(Value::Float(0.5), Value::UInt(1)).unwrap(),
            Value::Float(1.5)
        );
        assert!(Sum.fold(Value::UInt(u64::MAX), Value::UInt(1)).is_err());
        assert!(Sum.fold(Value::from("a"), Value::UInt(1)).is_err());
    }
}
