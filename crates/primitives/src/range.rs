use crate::BlockNumber;
use std::fmt;

/// A half-open interval of block heights, `[start_block, exclusive_end_block)`.
///
/// Ranges are the unit of everything the engine persists: cache chunks, store
/// snapshots and back-processing sub-requests are all keyed by a range.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct BlockRange {
    /// First block covered by the range.
    pub start_block: BlockNumber,
    /// First block *not* covered by the range.
    pub exclusive_end_block: BlockNumber,
}

impl BlockRange {
    /// Creates a new range. `start` must not exceed `exclusive_end`.
    pub const fn new(start_block: BlockNumber, exclusive_end_block: BlockNumber) -> Self {
        Self { start_block, exclusive_end_block }
    }

    /// Returns `true` if the given block number falls inside the range.
    pub const fn contains(&self, block_num: BlockNumber) -> bool {
        block_num >= self.start_block && block_num < self.exclusive_end_block
    }

    /// Number of blocks covered by the range.
    pub const fn size(&self) -> u64 {
        self.exclusive_end_block - self.start_block
    }

    /// Returns `true` if the range covers no blocks.
    pub const fn is_empty(&self) -> bool {
        self.exclusive_end_block <= self.start_block
    }

    /// The adjacent range of `size` blocks starting at this range's end.
    pub const fn next(&self, size: u64) -> Self {
        Self {
            start_block: self.exclusive_end_block,
            exclusive_end_block: self.exclusive_end_block + size,
        }
    }

    /// The adjacent range of `size` blocks ending at this range's start.
    pub const fn previous(&self, size: u64) -> Self {
        Self {
            start_block: self.start_block - size,
            exclusive_end_block: self.start_block,
        }
    }

    /// Splits the range into consecutive sub-ranges of at most `chunk_size`
    /// blocks. The produced ranges cover the input exactly and do not
    /// overlap; the last one may be short.
    pub fn split(&self, chunk_size: u64) -> Vec<Self> {
        if self.size() <= chunk_size {
            return vec![*self];
        }

        let mut res = Vec::with_capacity((self.size() / chunk_size + 1) as usize);
        let mut current_start = self.start_block;
        while current_start < self.exclusive_end_block {
            let current_end =
                (current_start + chunk_size).min(self.exclusive_end_block);
            res.push(Self::new(current_start, current_end));
            current_start = current_end;
        }
        res
    }

    /// Returns `true` if `other` overlaps this range.
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start_block < other.exclusive_end_block &&
            other.start_block < self.exclusive_end_block
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_block, self.exclusive_end_block)
    }
}

impl fmt::Debug for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An ordered collection of [`BlockRange`]s.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Ranges(
    /// The held ranges.
    pub Vec<BlockRange>,
);

impl Ranges {
    /// Number of ranges in the collection.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the collection holds no ranges.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends a range.
    pub fn push(&mut self, range: BlockRange) {
        self.0.push(range);
    }

    /// Returns `true` if any held range equals `range`.
    pub fn contains(&self, range: &BlockRange) -> bool {
        self.0.contains(range)
    }

    /// Iterates over the held ranges.
    pub fn iter(&self) -> std::slice::Iter<'_, BlockRange> {
        self.0.iter()
    }

    /// Sorts the collection by start block.
    pub fn sort(&mut self) {
        self.0.sort_by_key(|r| r.start_block);
    }

    /// Returns a new collection where adjacent and overlapping ranges have
    /// been coalesced. The result is sorted by start block.
    pub fn merged(&self) -> Self {
        let mut sorted = self.clone();
        sorted.sort();

        let mut out: Vec<BlockRange> = Vec::with_capacity(sorted.len());
        for range in sorted.0 {
            match out.last_mut() {
                Some(last) if range.start_block <= last.exclusive_end_block => {
                    last.exclusive_end_block =
                        last.exclusive_end_block.max(range.exclusive_end_block);
                }
                _ => out.push(range),
            }
        }
        Self(out)
    }

    /// Coalesces the collection, then re-splits the merged ranges on
    /// `bucket_size`-aligned boundaries. This is how missing partial ranges
    /// are grouped into sub-requests.
    pub fn merged_buckets(&self, bucket_size: u64) -> Self {
        let merged = self.merged();
        let mut out = Vec::with_capacity(merged.len());
        for range in merged.0 {
            let mut ptr = range.start_block;
            while ptr < range.exclusive_end_block {
                let end =
                    (ptr - ptr % bucket_size + bucket_size).min(range.exclusive_end_block);
                out.push(BlockRange::new(ptr, end));
                ptr = end;
            }
        }
        Self(out)
    }
}

impl From<Vec<BlockRange>> for Ranges {
    fn from(ranges: Vec<BlockRange>) -> Self {
        Self(ranges)
    }
}

impl FromIterator<BlockRange> for Ranges {
    fn from_iter<T: IntoIterator<Item = BlockRange>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Ranges {
    type Item = BlockRange;
    type IntoIter = std::vec::IntoIter<BlockRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Ranges {
    type Item = &'a BlockRange;
    type IntoIter = std::slice::Iter<'a, BlockRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Ranges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for range in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{range}")?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for Ranges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn range(start: u64, end: u64) -> BlockRange {
        BlockRange::new(start, end)
    }

    #[test]
    fn contains_is_half_open() {
        let r = range(10, 20);
        assert!(r.contains(10));
        assert!(r.contains(19));
        assert!(!r.contains(20));
        assert!(!r.contains(9));
    }

    #[test]
    fn split_exact_multiple() {
        let r = range(0, 30);
        assert_eq!(r.split(10), vec![range(0, 10), range(10, 20), range(20, 30)]);
    }

    #[test]
    fn split_with_remainder() {
        let r = range(0, 25);
        assert_eq!(r.split(10), vec![range(0, 10), range(10, 20), range(20, 25)]);
    }

    #[test]
    fn split_smaller_than_chunk() {
        let r = range(100, 105);
        assert_eq!(r.split(1000), vec![range(100, 105)]);
    }

    #[test]
    fn next_and_previous_are_adjacent() {
        let r = range(100, 200);
        assert_eq!(r.next(50), range(200, 250));
        assert_eq!(r.previous(50), range(50, 100));
    }

    #[test]
    fn merged_coalesces_adjacent_and_overlapping() {
        let ranges: Ranges =
            vec![range(30, 40), range(0, 10), range(10, 20), range(15, 25)].into();
        assert_eq!(ranges.merged(), Ranges(vec![range(0, 25), range(30, 40)]));
    }

    #[test]
    fn merged_buckets_resplits_on_bucket_size() {
        let ranges: Ranges = vec![range(0, 10), range(10, 20), range(40, 45)].into();
        assert_eq!(
            ranges.merged_buckets(15),
            Ranges(vec![range(0, 15), range(15, 20), range(40, 45)])
        );
    }

    #[test]
    fn merged_buckets_break_on_aligned_boundaries() {
        let ranges: Ranges = vec![range(40, 60)].into();
        assert_eq!(
            ranges.merged_buckets(15),
            Ranges(vec![range(40, 45), range(45, 60)])
        );
    }

    #[test]
    fn display_formats_as_interval() {
        assert_eq!(range(5, 10).to_string(), "[5, 10)");
        let ranges: Ranges = vec![range(0, 5), range(5, 10)].into();
        assert_eq!(ranges.to_string(), "[0, 5),[5, 10)");
    }

    proptest! {
        // `split` partitions its input: the chunks cover the range exactly
        // and no two chunks overlap.
        #[test]
        fn split_partitions_range(start in 0u64..100_000, size in 1u64..5_000, chunk in 1u64..1_000) {
            let r = range(start, start + size);
            let chunks = r.split(chunk);

            prop_assert_eq!(chunks.first().unwrap().start_block, r.start_block);
            prop_assert_eq!(chunks.last().unwrap().exclusive_end_block, r.exclusive_end_block);
            for pair in chunks.windows(2) {
                prop_assert_eq!(pair[0].exclusive_end_block, pair[1].start_block);
            }
            prop_assert_eq!(chunks.iter().map(BlockRange::size).sum::<u64>(), r.size());
        }

        #[test]
        fn merged_output_is_sorted_and_disjoint(ranges in proptest::collection::vec((0u64..1_000, 1u64..100), 0..20)) {
            let ranges: Ranges = ranges
                .into_iter()
                .map(|(start, size)| range(start, start + size))
                .collect();
            let merged = ranges.merged();
            for pair in merged.0.windows(2) {
                prop_assert!(pair[0].exclusive_end_block < pair[1].start_block);
                prop_assert!(!pair[0].overlaps(&pair[1]));
            }
        }
    }
}
