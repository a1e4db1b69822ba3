//! Partitioned parallel map-reduce over an append-only ledger.
//!
//! An [`Engine`] splits a height range into contiguous segments, computes the
//! first segment in this process and every other segment in a worker process
//! that reopens the ledger from its [`chainscan_ledger::LedgerDescriptor`].
//! Worker results come back as JSON in which every entity is an
//! [`EntityReference`], resolved against the caller's own chain, and are
//! folded in segment order.
pub mod engine;
pub mod error;
pub mod executor;
pub mod job;
pub mod jobs;
pub mod partition;
pub mod protocol;
pub mod reduce;
pub mod value;
pub mod wire;
pub mod worker;

pub use engine::{Engine, EngineOptions};
pub use error::{EngineError, PartitionError, ResolutionError, SerializationError, WorkerFailure};
pub use job::RangeJob;
pub use partition::{partition, Segment};
pub use protocol::{EntityCodec, EntityReference, ProtocolStats, StatsSnapshot};
pub use value::Value;

#[cfg(test)]
pub(crate) mod test_support {
    use chainscan_ledger::fixtures::synthetic_blocks;
    use chainscan_ledger::{BlockRecord, Chain, LedgerWriter};
    use tempfile::TempDir;

    pub fn chain_from(blocks: &[BlockRecord]) -> (TempDir, Chain) {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = LedgerWriter::create(dir.path()).unwrap();
        writer.append_all(blocks).unwrap();
        let chain = Chain::open(&writer.descriptor()).unwrap();
        (dir, chain)
    }

    pub fn sample_chain(blocks: u64) -> (TempDir, Chain) {
        chain_from(&synthetic_blocks(blocks))
    }
}
