use std::path::PathBuf;

use chainscan_ledger::LedgerError;

use crate::protocol::EntityReference;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("Invalid block range [{start}, {end})")]
    InvalidRange { start: u64, end: u64 },
    #[error("Block range ends at {end} but the ledger only has {len} blocks")]
    OutOfBounds { end: u64, len: u64 },
    #[error("Worker count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),
    #[error("Failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
    /// Reported by a worker process; carries the worker's rendering of the error.
    #[error("{0}")]
    Remote(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("Failed to resolve {reference}: {source}")]
    Unresolvable {
        reference: EntityReference,
        #[source]
        source: LedgerError,
    },
    #[error("Failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerFailure {
    #[error("Computation failed on segment {segment}: {message}")]
    Job { segment: usize, message: String },
    #[error("Worker for segment {segment} could not read the ledger: {message}")]
    Ledger { segment: usize, message: String },
    #[error("Failed to spawn worker process {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Worker for segment {segment} failed with IO error: {source}")]
    Io {
        segment: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("Worker for segment {segment} violated the protocol: {message}")]
    Protocol { segment: usize, message: String },
}

impl WorkerFailure {
    pub fn segment(&self) -> Option<usize> {
        match self {
            WorkerFailure::Job { segment, .. }
            | WorkerFailure::Ledger { segment, .. }
            | WorkerFailure::Io { segment, .. }
            | WorkerFailure::Protocol { segment, .. } => Some(*segment),
            WorkerFailure::Spawn { .. } => None,
        }
    }
}

/// Everything that can end a map-reduce call.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error("Failed to serialize the result of segment {segment}: {source}")]
    Serialization {
        segment: usize,
        #[source]
        source: SerializationError,
    },
    #[error("Failed to resolve the result of segment {segment}: {source}")]
    Resolution {
        segment: usize,
        #[source]
        source: ResolutionError,
    },
    #[error(transparent)]
    Worker(#[from] WorkerFailure),
    #[error("Failed to read the ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Reduce function failed on the result of segment {segment}: {source}")]
    Reduce {
        segment: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("Nothing to reduce: no results and no initial value")]
    EmptyReduction,
    #[error("Unexpected value in result: expected {expected}, found {found}")]
    UnexpectedValue {
        expected: &'static str,
        found: &'static str,
    },
}

impl EngineError {
    /// Index of the segment the error came from, when it is tied to one.
    pub fn segment(&self) -> Option<usize> {
        match self {
            EngineError::Serialization { segment, .. }
            | EngineError::Resolution { segment, .. }
            | EngineError::Reduce { segment, .. } => Some(*segment),
            EngineError::Worker(failure) => failure.segment(),
            _ => None,
        }
    }
}
