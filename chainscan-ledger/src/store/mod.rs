//! Append-only JSON-lines ledger store.
//!
//! A store is a directory holding `blocks.jsonl`. Line `n` is the block at
//! height `n`. Writers only ever append whole lines, so any prefix of complete
//! lines is a valid ledger.
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::LedgerError;

mod reader;
mod writer;

pub use reader::FileLedger;
pub use writer::LedgerWriter;

pub const BLOCKS_FILE: &str = "blocks.jsonl";

pub fn blocks_path(location: &Path) -> PathBuf {
    location.join(BLOCKS_FILE)
}

/// Number of complete blocks currently in the store at `location`.
///
/// A trailing line without a newline is an append in progress and is not
/// counted.
pub fn stored_block_count(location: &Path) -> Result<u64, LedgerError> {
    let path = blocks_path(location);
    let file = File::open(&path).map_err(|source| LedgerError::Io {
        path: path.clone(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    let mut count = 0;
    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|source| LedgerError::Io {
                path: path.clone(),
                source,
            })?;
        if n == 0 || line.last() != Some(&b'\n') {
            break;
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::descriptor::LedgerDescriptor;
    use crate::fixtures::synthetic_blocks;
    use crate::record::InputRecord;
    use crate::{Chain, LedgerAccess};

    #[test]
    fn appended_blocks_stay_invisible_to_an_earlier_bound() {
        let dir = tempfile::tempdir().unwrap();
        let blocks = synthetic_blocks(30);
        let mut writer = LedgerWriter::create(dir.path()).unwrap();
        writer.append_all(&blocks[..20]).unwrap();
        let descriptor = writer.descriptor();
        assert_eq!(descriptor.bound, 20);

        writer.append_all(&blocks[20..]).unwrap();
        assert_eq!(stored_block_count(dir.path()).unwrap(), 30);

        let reopened = FileLedger::open(&descriptor).unwrap();
        assert_eq!(reopened.block_count(), 20);
        assert_eq!(
            reopened.tx_count(),
            Chain::open(&descriptor).unwrap().tx_count()
        );
        assert_eq!(FileLedger::open_latest(dir.path()).unwrap().block_count(), 30);
    }

    #[test]
    fn incomplete_trailing_line_is_not_a_block() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = LedgerWriter::create(dir.path()).unwrap();
        writer.append_all(&synthetic_blocks(3)).unwrap();

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(blocks_path(dir.path()))
            .unwrap();
        file.write_all(b"{\"hash\":\"partial").unwrap();

        assert_eq!(stored_block_count(dir.path()).unwrap(), 3);
        assert_eq!(FileLedger::open_latest(dir.path()).unwrap().block_count(), 3);
    }

    #[test]
    fn bound_past_the_end_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = LedgerWriter::create(dir.path()).unwrap();
        writer.append_all(&synthetic_blocks(4)).unwrap();

        let err = FileLedger::open(&LedgerDescriptor::new(dir.path(), 9)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Truncated {
                expected: 9,
                found: 4
            }
        ));
    }

    #[test]
    fn spending_an_unknown_output_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut blocks = synthetic_blocks(3);
        blocks[2].txes[1].inputs.push(InputRecord {
            tx_index: 40,
            output_index: 0,
        });
        let mut writer = LedgerWriter::create(dir.path()).unwrap();
        writer.append_all(&blocks).unwrap();

        let err = FileLedger::open_latest(dir.path()).unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { height: 2, .. }));
    }

    #[test]
    fn transactions_are_located_across_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = LedgerWriter::create(dir.path()).unwrap();
        writer.append_all(&synthetic_blocks(5)).unwrap();
        let ledger = FileLedger::open_latest(dir.path()).unwrap();

        assert_eq!(ledger.tx_count(), 9);
        assert_eq!(ledger.first_tx_index(3), Some(5));
        assert_eq!(ledger.tx(0).unwrap().height, 0);
        assert_eq!(ledger.tx(5).unwrap().height, 3);
        assert_eq!(ledger.tx(6).unwrap().height, 3);
        assert!(ledger.tx(9).is_none());
    }
}
