use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::primitives::pager::PAGE_SIZE;
use crate::types::PageNo;

const INTERVALS: usize = 40;
const THRESHOLD: usize = PAGE_SIZE / INTERVALS;

/// A page and the free bytes it had when it was added.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageInfo {
    /// Page number.
    pub pgno: PageNo,
    /// Free bytes at the time the page was indexed.
    pub free: usize,
}

/// Buckets pages by free space in whole `PAGE_SIZE / 40` intervals.
///
/// A selected page is removed from the index, so at most one inserter
/// writes to a page at a time; the caller adds it back when done.
pub struct FreeSpaceIndex {
    buckets: Mutex<Vec<VecDeque<PageInfo>>>,
}

impl FreeSpaceIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![VecDeque::new(); INTERVALS + 1]),
        }
    }

    /// Files `pgno` under the bucket its free space certainly covers.
    pub fn add(&self, pgno: PageNo, free: usize) {
        let bucket = (free / THRESHOLD).min(INTERVALS);
        self.buckets.lock()[bucket].push_back(PageInfo { pgno, free });
    }

    /// Takes a page that can hold `size` bytes, if one is indexed.
    ///
    /// Buckets above the starting one are FIFO. The top bucket is capped, so
    /// entries there are checked against `size` individually.
    pub fn select(&self, size: usize) -> Option<PageInfo> {
        let start = size.div_ceil(THRESHOLD).min(INTERVALS);
        let mut buckets = self.buckets.lock();
        buckets[start..].iter_mut().find_map(|bucket| {
            let pos = bucket.iter().position(|info| info.free >= size)?;
            bucket.remove(pos)
        })
    }

    /// Number of indexed pages.
    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(VecDeque::len).sum()
    }

    /// True when no page is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FreeSpaceIndex {
    fn default() -> Self {
        Self::new()
    }
}
