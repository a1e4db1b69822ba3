use std::ops::{Bound, RangeBounds};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chainscan_config::CONFIG;
use chainscan_ledger::{Block, Chain, Entity, Tx};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{EngineError, PartitionError};
use crate::executor::{resolve_worker_path, Executor};
use crate::job::{
    BlockFilter, BlockMap, FilterBlocks, FilterTxes, Fold, FoldBlocks, FoldTxes, MapBlocks,
    RangeJob, TxFilter, TxMap,
};
use crate::partition::partition;
use crate::protocol::{EntityCodec, ProtocolStats, StatsSnapshot};
use crate::reduce::{concat, reduce_all};
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Number of segments per call: one computed locally, the rest by workers.
    pub worker_count: usize,
    /// Worker executable. Resolved from the environment when unset.
    pub worker_path: Option<PathBuf>,
    pub forward_worker_stderr: bool,
}

impl EngineOptions {
    pub fn from_config() -> Self {
        Self {
            worker_count: CONFIG.effective_worker_count(),
            worker_path: CONFIG.worker.clone(),
            forward_worker_stderr: CONFIG.worker_log,
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config()
    }
}

/// Partitioned parallel map-reduce over a chain.
#[derive(Debug, Clone)]
pub struct Engine {
    options: EngineOptions,
    executor: Executor,
    stats: Arc<ProtocolStats>,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        let stats = Arc::new(ProtocolStats::default());
        let worker_path = resolve_worker_path(options.worker_path.as_deref());
        let executor = Executor::new(
            EntityCodec::with_stats(stats.clone()),
            worker_path,
            options.forward_worker_stderr,
        );
        Self {
            options,
            executor,
            stats,
        }
    }

    pub fn from_config() -> Self {
        Self::new(EngineOptions::from_config())
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.options.worker_count = worker_count;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.options.worker_count
    }

    /// Protocol activity since this engine was built.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Runs `job` over `range` and returns one result per segment, in
    /// segment order.
    pub async fn map_segments(
        &self,
        chain: &Chain,
        job: Arc<dyn RangeJob>,
        range: impl RangeBounds<u64>,
    ) -> Result<Vec<Value>, EngineError> {
        let call_id = Uuid::new_v4();
        async {
            let (start, end) = resolve_range(chain, &range).inspect_err(|e| {
                tracing::info!(error = %e, "rejected block range");
            })?;
            let segments = partition(start, end, self.options.worker_count)?;
            tracing::info!(start, end, segments = segments.len(), job = ?job, "starting map-reduce");
            let started = Instant::now();
            let results = self.executor.execute(chain, &segments, job).await;
            match &results {
                Ok(_) => tracing::info!(elapsed = ?started.elapsed(), "map-reduce finished"),
                Err(e) => tracing::info!(
                    elapsed = ?started.elapsed(),
                    segment = ?e.segment(),
                    error = %e,
                    "map-reduce failed"
                ),
            }
            results
        }
        .instrument(tracing::info_span!("map_reduce", %call_id))
        .await
    }

    /// Maps every segment of `range` with `job` and folds the segment results
    /// in order with `reduce`, starting from `initial` or, without one, from
    /// the first segment's result.
    pub async fn map_reduce<J, F>(
        &self,
        chain: &Chain,
        job: J,
        reduce: F,
        initial: Option<Value>,
        range: impl RangeBounds<u64>,
    ) -> Result<Value, EngineError>
    where
        J: RangeJob + 'static,
        F: FnMut(Value, Value) -> anyhow::Result<Value>,
    {
        let results = self.map_segments(chain, Arc::new(job), range).await?;
        reduce_all(results, reduce, initial)
    }

    /// `map` applied to every block of `range`, in height order.
    pub async fn map_blocks(
        &self,
        chain: &Chain,
        map: Box<dyn BlockMap>,
        range: impl RangeBounds<u64>,
    ) -> Result<Vec<Value>, EngineError> {
        self.collect(chain, Arc::new(MapBlocks { map }), range).await
    }

    /// Blocks of `range` passing `filter`.
    pub async fn filter_blocks(
        &self,
        chain: &Chain,
        filter: Box<dyn BlockFilter>,
        range: impl RangeBounds<u64>,
    ) -> Result<Vec<Block>, EngineError> {
        self.collect(chain, Arc::new(FilterBlocks { filter }), range)
            .await?
            .into_iter()
            .map(|value| match value.into_entity() {
                Some(Entity::Block(block)) => Ok(block),
                other => Err(unexpected("block", other)),
            })
            .collect()
    }

    /// Transactions of the blocks of `range` passing `filter`.
    pub async fn filter_txes(
        &self,
        chain: &Chain,
        filter: Box<dyn TxFilter>,
        range: impl RangeBounds<u64>,
    ) -> Result<Vec<Tx>, EngineError> {
        self.collect(chain, Arc::new(FilterTxes { filter }), range)
            .await?
            .into_iter()
            .map(|value| match value.into_entity() {
                Some(Entity::Tx(tx)) => Ok(tx),
                other => Err(unexpected("tx", other)),
            })
            .collect()
    }

    /// Maps every block and folds the mapped values in height order,
    /// starting from `initial` or, without one, from the first mapped value.
    ///
    /// See [`Fold`] for what the fold must satisfy to give the same answer for
    /// every worker count.
    pub async fn mapreduce_blocks(
        &self,
        chain: &Chain,
        map: Box<dyn BlockMap>,
        fold: Box<dyn Fold>,
        initial: Option<Value>,
        range: impl RangeBounds<u64>,
    ) -> Result<Value, EngineError> {
        let job = Arc::new(FoldBlocks { map, fold });
        let partials = self.map_segments(chain, job.clone(), range).await?;
        fold_partials(job.fold.as_ref(), partials, initial)
    }

    /// Maps every transaction and folds the mapped values in ledger order,
    /// starting from `initial` or, without one, from the first mapped value.
    pub async fn mapreduce_txes(
        &self,
        chain: &Chain,
        map: Box<dyn TxMap>,
        fold: Box<dyn Fold>,
        initial: Option<Value>,
        range: impl RangeBounds<u64>,
    ) -> Result<Value, EngineError> {
        let job = Arc::new(FoldTxes { map, fold });
        let partials = self.map_segments(chain, job.clone(), range).await?;
        fold_partials(job.fold.as_ref(), partials, initial)
    }

    async fn collect(
        &self,
        chain: &Chain,
        job: Arc<dyn RangeJob>,
        range: impl RangeBounds<u64>,
    ) -> Result<Vec<Value>, EngineError> {
        let results = self.map_segments(chain, job, range).await?;
        let list = reduce_all(results, concat, Some(Value::List(Vec::new())))?;
        list.into_list()
            .ok_or(EngineError::UnexpectedValue {
                expected: "list",
                found: "non-list",
            })
    }
}

fn unexpected(expected: &'static str, found: Option<Entity>) -> EngineError {
    EngineError::UnexpectedValue {
        expected,
        found: found.as_ref().map_or("non-entity", Entity::kind),
    }
}

/// Folds the per-segment partials in segment order. Without `initial`, the
/// first partial seeds the fold and an all-empty range has nothing to return.
fn fold_partials(
    fold: &dyn Fold,
    partials: Vec<Value>,
    initial: Option<Value>,
) -> Result<Value, EngineError> {
    let mut acc = initial;
    for (segment, partial) in partials.into_iter().enumerate() {
        let found = partial.kind();
        let items = partial.into_list().ok_or(EngineError::UnexpectedValue {
            expected: "list",
            found,
        })?;
        for item in items {
            acc = Some(match acc {
                None => item,
                Some(acc) => fold
                    .fold(acc, item)
                    .map_err(|source| EngineError::Reduce { segment, source })?,
            });
        }
    }
    acc.ok_or(EngineError::EmptyReduction)
}

fn resolve_range(chain: &Chain, range: &impl RangeBounds<u64>) -> Result<(u64, u64), PartitionError> {
    let len = chain.len();
    let start = match range.start_bound() {
        Bound::Included(start) => *start,
        Bound::Excluded(start) => start.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(end) => end.checked_add(1).ok_or(PartitionError::OutOfBounds {
            end: u64::MAX,
            len,
        })?,
        Bound::Excluded(end) => *end,
        Bound::Unbounded => len,
    };
    if start > end {
        return Err(PartitionError::InvalidRange { start, end });
    }
    if end > len {
        return Err(PartitionError::OutOfBounds { end, len });
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{BlockHeight, CollectHeights, Sum, TxFee};
    use crate::test_support::sample_chain;

    fn local_engine() -> Engine {
        Engine::new(EngineOptions {
            worker_count: 1,
            worker_path: Some(PathBuf::from("/nonexistent/worker")),
            forward_worker_stderr: false,
        })
    }

    #[test]
    fn ranges_resolve_against_the_chain() {
        let (_dir, chain) = sample_chain(10);
        assert_eq!(resolve_range(&chain, &(..)).unwrap(), (0, 10));
        assert_eq!(resolve_range(&chain, &(3..=4)).unwrap(), (3, 5));
        assert_eq!(resolve_range(&chain, &(7..)).unwrap(), (7, 10));
        assert_eq!(
            resolve_range(&chain, &(0..11)),
            Err(PartitionError::OutOfBounds { end: 11, len: 10 })
        );
        assert_eq!(
            resolve_range(&chain, &(Bound::Included(6), Bound::Excluded(2))),
            Err(PartitionError::InvalidRange { start: 6, end: 2 })
        );
    }

    /// Records every event's message with the names of its enclosing spans.
    #[derive(Clone, Default)]
    struct EventScopes(Arc<std::sync::Mutex<Vec<(String, Vec<&'static str>)>>>);

    #[derive(Default)]
    struct Message(String);

    impl tracing::field::Visit for Message {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S> tracing_subscriber::Layer<S> for EventScopes
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        fn on_event(&self, event: &tracing::Event<'_>, ctx: tracing_subscriber::layer::Context<'_, S>) {
            let mut message = Message::default();
            event.record(&mut message);
            let scope = ctx
                .event_scope(event)
                .map(|scope| scope.map(|span| span.name()).collect())
                .unwrap_or_default();
            self.0.lock().unwrap().push((message.0, scope));
        }
    }

    #[tokio::test]
    async fn rejected_ranges_are_logged_inside_the_call_span() {
        use tracing_subscriber::layer::SubscriberExt;

        let events = EventScopes::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(events.clone()),
        );

        let (_dir, chain) = sample_chain(5);
        let err = local_engine()
            .map_reduce(&chain, CollectHeights, concat, None, 0..9)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Partition(PartitionError::OutOfBounds { end: 9, len: 5 })
        ));

        let events = events.0.lock().unwrap();
        let (_, scope) = events
            .iter()
            .find(|(message, _)| message == "rejected block range")
            .expect("range rejection was not logged");
        assert_eq!(scope, &vec!["map_reduce"]);
    }

    #[tokio::test]
    async fn single_worker_matches_sequential_evaluation() {
        let (_dir, chain) = sample_chain(30);
        let engine = local_engine();

        let result = engine
            .map_reduce(&chain, CollectHeights, concat, None, 10..20)
            .await
            .unwrap();
        let expected: Vec<u64> = chain.slice(10, 20).unwrap().iter().map(|b| b.height()).collect();
        assert_eq!(result, Value::from(expected));
        assert_eq!(engine.stats().invocations(), 0);
    }

    #[tokio::test]
    async fn zero_workers_is_a_partition_error() {
        let (_dir, chain) = sample_chain(5);
        let engine = local_engine().with_worker_count(0);
        let err = engine
            .map_reduce(&chain, CollectHeights, concat, None, ..)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Partition(PartitionError::InvalidWorkerCount(0))
        ));
    }

    #[tokio::test]
    async fn folds_start_from_the_initial_value() {
        let (_dir, chain) = sample_chain(8);
        let engine = local_engine();

        let heights = engine
            .mapreduce_blocks(&chain, Box::new(BlockHeight), Box::new(Sum), Some(Value::UInt(100)), ..)
            .await
            .unwrap();
        assert_eq!(heights, Value::UInt(100 + (0..8).sum::<u64>()));

        let fees = engine
            .mapreduce_txes(&chain, Box::new(TxFee), Box::new(Sum), Some(Value::UInt(0)), 0..0)
            .await
            .unwrap();
        assert_eq!(fees, Value::UInt(0));
    }

    #[tokio::test]
    async fn folds_without_initial_start_from_the_first_value() {
        let (_dir, chain) = sample_chain(8);
        let engine = local_engine();

        let heights = engine
            .mapreduce_blocks(&chain, Box::new(BlockHeight), Box::new(Sum), None, 3..8)
            .await
            .unwrap();
        assert_eq!(heights, Value::UInt((3..8).sum()));

        let err = engine
            .mapreduce_txes(&chain, Box::new(TxFee), Box::new(Sum), None, 4..4)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmptyReduction));
    }

    #[test]
    fn partials_fold_across_segments_in_order() {
        let partials = vec![
            Value::List(vec![Value::UInt(3)]),
            Value::List(vec![]),
            Value::List(vec![Value::UInt(4)]),
        ];
        assert_eq!(
            fold_partials(&Sum, partials.clone(), None).unwrap(),
            Value::UInt(7)
        );
        assert_eq!(
            fold_partials(&Sum, partials, Some(Value::UInt(10))).unwrap(),
            Value::UInt(17)
        );
        assert!(matches!(
            fold_partials(&Sum, vec![Value::List(vec![]); 3], None),
            Err(EngineError::EmptyReduction)
        ));
        assert!(matches!(
            fold_partials(&Sum, vec![Value::UInt(1)], None),
            Err(EngineError::UnexpectedValue { expected: "list", .. })
        ));
    }
}
