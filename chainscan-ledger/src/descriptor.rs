use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Everything another process needs to reopen the same logical ledger.
///
/// `bound` is the number of blocks visible through the accessor. It is fixed
/// when the descriptor is captured, so a store that keeps growing on disk is
/// still seen as the same prefix by every process holding this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerDescriptor {
    pub location: PathBuf,
    pub bound: u64,
}

impl LedgerDescriptor {
    pub fn new(location: impl Into<PathBuf>, bound: u64) -> Self {
        Self {
            location: location.into(),
            bound,
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Same store, different bound.
    pub fn with_bound(&self, bound: u64) -> Self {
        Self {
            location: self.location.clone(),
            bound,
        }
    }
}
