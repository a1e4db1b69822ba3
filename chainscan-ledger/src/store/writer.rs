use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::descriptor::LedgerDescriptor;
use crate::error::LedgerError;
use crate::record::BlockRecord;

use super::{blocks_path, stored_block_count};

/// Appends blocks to a store. Readers opened earlier keep their bound.
#[derive(Debug)]
pub struct LedgerWriter {
    location: PathBuf,
    file: File,
    block_count: u64,
}

impl LedgerWriter {
    /// Opens the store at `location` for appending, creating it if needed.
    pub fn create(location: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let location = location.as_ref().to_path_buf();
        std::fs::create_dir_all(&location).map_err(|source| LedgerError::Io {
            path: location.clone(),
            source,
        })?;

        let path = blocks_path(&location);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LedgerError::Io {
                path: path.clone(),
                source,
            })?;
        let block_count = stored_block_count(&location)?;

        Ok(Self {
            location,
            file,
            block_count,
        })
    }

    pub fn append(&mut self, block: &BlockRecord) -> Result<u64, LedgerError> {
        let mut line = serde_json::to_vec(block).map_err(LedgerError::Encode)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .and_then(|()| self.file.flush())
            .map_err(|source| LedgerError::Io {
                path: blocks_path(&self.location),
                source,
            })?;

        let height = self.block_count;
        self.block_count += 1;
        tracing::trace!(height, "appended block");
        Ok(height)
    }

    pub fn append_all<'a>(
        &mut self,
        blocks: impl IntoIterator<Item = &'a BlockRecord>,
    ) -> Result<(), LedgerError> {
        for block in blocks {
            self.append(block)?;
        }
        Ok(())
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Descriptor covering everything written so far.
    pub fn descriptor(&self) -> LedgerDescriptor {
        LedgerDescriptor::new(self.location.clone(), self.block_count)
    }
}
