//! Serializable computations.
//!
//! Closures cannot be sent to another process, so every map function is a
//! registered trait object: it travels to a worker as JSON and is rebuilt
//! there through `typetag`. A worker can run any job type linked into its
//! binary.
use std::fmt::Debug;

use chainscan_ledger::{Block, BlockRange, Tx};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A computation over one contiguous run of blocks.
#[typetag::serde]
pub trait RangeJob: Debug + Send + Sync {
    fn map(&self, blocks: &BlockRange) -> anyhow::Result<Value>;
}

#[typetag::serde]
pub trait BlockMap: Debug + Send + Sync {
    fn apply(&self, block: &Block) -> anyhow::Result<Value>;
}

#[typetag::serde]
pub trait TxMap: Debug + Send + Sync {
    fn apply(&self, tx: &Tx) -> anyhow::Result<Value>;
}

#[typetag::serde]
pub trait BlockFilter: Debug + Send + Sync {
    fn matches(&self, block: &Block) -> anyhow::Result<bool>;
}

#[typetag::serde]
pub trait TxFilter: Debug + Send + Sync {
    fn matches(&self, tx: &Tx) -> anyhow::Result<bool>;
}

/// Combines an accumulator with the next item, in ledger order.
///
/// A fold runs twice: unseeded over the mapped items of each segment, then
/// over the segment results starting from the caller's initial value. The
/// accumulator must therefore have the same shape as the items, and the fold
/// must be associative for the answer to be the same for every worker count.
/// Numeric sums qualify. Pushing items into a list accumulator does not.
#[typetag::serde]
pub trait Fold: Debug + Send + Sync {
    fn fold(&self, acc: Value, next: Value) -> anyhow::Result<Value>;
}

/// One value per block.
#[derive(Debug, Serialize, Deserialize)]
pub struct MapBlocks {
    pub map: Box<dyn BlockMap>,
}

#[typetag::serde(name = "map_blocks")]
impl RangeJob for MapBlocks {
    fn map(&self, blocks: &BlockRange) -> anyhow::Result<Value> {
        blocks.iter().map(|block| self.map.apply(&block)).collect()
    }
}

/// Blocks passing the filter, as entities.
#[derive(Debug, Serialize, Deserialize)]
pub struct FilterBlocks {
    pub filter: Box<dyn BlockFilter>,
}

#[typetag::serde(name = "filter_blocks")]
impl RangeJob for FilterBlocks {
    fn map(&self, blocks: &BlockRange) -> anyhow::Result<Value> {
        let mut matched = Vec::new();
        for block in blocks.iter() {
            if self.filter.matches(&block)? {
                matched.push(Value::from(block));
            }
        }
        Ok(Value::List(matched))
    }
}

/// Transactions passing the filter, as entities.
#[derive(Debug, Serialize, Deserialize)]
pub struct FilterTxes {
    pub filter: Box<dyn TxFilter>,
}

#[typetag::serde(name = "filter_txes")]
impl RangeJob for FilterTxes {
    fn map(&self, blocks: &BlockRange) -> anyhow::Result<Value> {
        let mut matched = Vec::new();
        for tx in blocks.txes() {
            if self.filter.matches(&tx)? {
                matched.push(Value::from(tx));
            }
        }
        Ok(Value::List(matched))
    }
}

/// Maps every block and folds the mapped values of the segment.
///
/// The segment result is a list holding the folded value, or an empty list
/// for an empty segment. The caller folds those partials again, starting
/// from its own initial value, so the outcome does not depend on how the
/// range was split.
#[derive(Debug, Serialize, Deserialize)]
pub struct FoldBlocks {
    pub map: Box<dyn BlockMap>,
    pub fold: Box<dyn Fold>,
}

#[typetag::serde(name = "fold_blocks")]
impl RangeJob for FoldBlocks {
    fn map(&self, blocks: &BlockRange) -> anyhow::Result<Value> {
        let mapped = blocks.iter().map(|block| self.map.apply(&block));
        fold_partial(self.fold.as_ref(), mapped)
    }
}

/// Per-transaction counterpart of [`FoldBlocks`].
#[derive(Debug, Serialize, Deserialize)]
pub struct FoldTxes {
    pub map: Box<dyn TxMap>,
    pub fold: Box<dyn Fold>,
}

#[typetag::serde(name = "fold_txes")]
impl RangeJob for FoldTxes {
    fn map(&self, blocks: &BlockRange) -> anyhow::Result<Value> {
        let mapped = blocks.txes().map(|tx| self.map.apply(&tx));
        fold_partial(self.fold.as_ref(), mapped)
    }
}

fn fold_partial(
    fold: &dyn Fold,
    mapped: impl Iterator<Item = anyhow::Result<Value>>,
) -> anyhow::Result<Value> {
    let mut acc: Option<Value> = None;
    for next in mapped {
        let next = next?;
        acc = Some(match acc {
            None => next,
            Some(acc) => fold.fold(acc, next)?,
        });
    }
    Ok(Value::List(acc.into_iter().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{BlockHeight, MinTxCount, Sum};
    use crate::test_support::sample_chain;

    #[test]
    fn jobs_survive_a_trip_through_json() {
        let job: Box<dyn RangeJob> = Box::new(FoldBlocks {
            map: Box::new(BlockHeight),
            fold: Box::new(Sum),
        });
        let json = serde_json::to_string(&job).unwrap();
        let rebuilt: Box<dyn RangeJob> = serde_json::from_str(&json).unwrap();

        let (_dir, chain) = sample_chain(6);
        let range = chain.slice(1, 5).unwrap();
        assert_eq!(
            rebuilt.map(&range).unwrap(),
            job.map(&range).unwrap()
        );
    }

    #[test]
    fn fold_of_an_empty_segment_is_an_empty_list() {
        let (_dir, chain) = sample_chain(3);
        let job = FoldBlocks {
            map: Box::new(BlockHeight),
            fold: Box::new(Sum),
        };
        let empty = chain.slice(2, 2).unwrap();
        assert_eq!(job.map(&empty).unwrap(), Value::List(vec![]));

        let partial = job.map(&chain.slice(0, 3).unwrap()).unwrap();
        assert_eq!(partial, Value::List(vec![Value::UInt(3)]));
    }

    #[test]
    fn filters_return_entities() {
        let (_dir, chain) = sample_chain(4);
        let job = FilterBlocks {
            filter: Box::new(MinTxCount { min: 2 }),
        };
        let matched = job.map(&chain.blocks()).unwrap();
        let heights: Vec<u64> = matched
            .into_list()
            .unwrap()
            .into_iter()
            .map(|value| match value.into_entity() {
                Some(chainscan_ledger::Entity::Block(block)) => block.height(),
                other => panic!("expected a block, got {other:?}"),
            })
            .collect();
        assert_eq!(heights, vec![1, 2, 3]);
    }
}
