use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PartitionError;

/// Half-open run of block heights `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
}

impl Segment {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, height: u64) -> bool {
        (self.start..self.end).contains(&height)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Splits `[start, end)` into `n` contiguous segments of near-equal size.
///
/// The remainder is spread one height at a time over the earliest segments.
/// A range shorter than `n` yields one single-height segment per height, and an
/// empty range yields one empty segment.
pub fn partition(start: u64, end: u64, n: usize) -> Result<Vec<Segment>, PartitionError> {
    if start > end {
        return Err(PartitionError::InvalidRange { start, end });
    }
    if n == 0 {
        return Err(PartitionError::InvalidWorkerCount(n));
    }

    let len = end - start;
    let count = (n as u64).min(len).max(1);
    let base = len / count;
    let remainder = len % count;

    let mut segments = Vec::with_capacity(count as usize);
    let mut cursor = start;
    for i in 0..count {
        let size = base + u64::from(i < remainder);
        segments.push(Segment::new(cursor, cursor + size));
        cursor += size;
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tiles(segments: &[Segment], start: u64, end: u64) {
        assert!(!segments.is_empty());
        assert_eq!(segments[0].start, start);
        assert_eq!(segments[segments.len() - 1].end, end);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        let covered: u64 = segments.iter().map(Segment::len).sum();
        assert_eq!(covered, end - start);
    }

    #[test]
    fn segments_tile_the_range_in_order() {
        for start in [0u64, 3, 10] {
            for len in 0u64..40 {
                for n in 1usize..12 {
                    let end = start + len;
                    let segments = partition(start, end, n).unwrap();
                    assert_tiles(&segments, start, end);

                    let expected = (n as u64).min(len).max(1) as usize;
                    assert_eq!(segments.len(), expected, "len={len} n={n}");
                    if len > 0 {
                        assert!(segments.iter().all(|s| !s.is_empty()));
                    }
                }
            }
        }
    }

    #[test]
    fn remainder_goes_to_the_earliest_segments() {
        let sizes: Vec<u64> = partition(0, 97, 8)
            .unwrap()
            .iter()
            .map(Segment::len)
            .collect();
        assert_eq!(sizes, vec![13, 12, 12, 12, 12, 12, 12, 12]);

        let sizes: Vec<u64> = partition(5, 16, 3)
            .unwrap()
            .iter()
            .map(Segment::len)
            .collect();
        assert_eq!(sizes, vec![4, 4, 3]);
    }

    #[test]
    fn single_worker_gets_the_whole_range() {
        assert_eq!(partition(10, 20, 1).unwrap(), vec![Segment::new(10, 20)]);
    }

    #[test]
    fn short_range_yields_fewer_segments() {
        assert_eq!(
            partition(4, 7, 8).unwrap(),
            vec![Segment::new(4, 5), Segment::new(5, 6), Segment::new(6, 7)]
        );
        assert_eq!(partition(9, 9, 4).unwrap(), vec![Segment::new(9, 9)]);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert_eq!(
            partition(5, 4, 2),
            Err(PartitionError::InvalidRange { start: 5, end: 4 })
        );
        assert_eq!(
            partition(0, 4, 0),
            Err(PartitionError::InvalidWorkerCount(0))
        );
    }
}
