use crate::primitives::pager::{MIN_CACHE_PAGES, PAGE_SIZE};

/// Default memory budget of the page cache: 64 MiB.
pub const DEFAULT_CACHE_BYTES: u64 = 64 << 20;

/// Configuration options supplied when creating or opening a database.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Memory budget for cached pages, in bytes.
    pub cache_bytes: u64,
    /// Maximum number of decoded records kept resident; 0 means unbounded.
    pub record_cache_capacity: usize,
}

impl EngineOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page cache memory budget.
    pub fn cache_bytes(mut self, bytes: u64) -> Self {
        self.cache_bytes = bytes;
        self
    }

    /// Sets the record cache bound.
    pub fn record_cache_capacity(mut self, capacity: usize) -> Self {
        self.record_cache_capacity = capacity;
        self
    }

    /// Number of pages the page cache may hold.
    pub fn page_cache_pages(&self) -> usize {
        let pages = usize::try_from(self.cache_bytes / PAGE_SIZE as u64).unwrap_or(usize::MAX);
        pages.max(MIN_CACHE_PAGES)
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cache_bytes: DEFAULT_CACHE_BYTES,
            record_cache_capacity: 0,
        }
    }
}
