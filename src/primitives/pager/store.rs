use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Page, PAGE_SIZE};
use crate::primitives::cache::{Handle, Loader, RefCache};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{KeelError, PageNo, Result};

/// Smallest page cache the store accepts.
pub const MIN_CACHE_PAGES: usize = 10;

/// Counted reference to a cached page.
pub type PageHandle = Handle<PageLoader>;

/// Reads pages from the `.db` file and flushes dirty ones on eviction.
pub struct PageLoader {
    io: Arc<dyn FileIo>,
}

impl PageLoader {
    fn flush(&self, page: &Page) -> Result<()> {
        let image = page.snapshot_for_flush();
        self.io.write_at(page_offset(page.pgno()), &image)?;
        self.io.sync_all()
    }
}

impl Loader for PageLoader {
    type Key = PageNo;
    type Value = Page;

    fn load(&self, pgno: PageNo) -> Result<Page> {
        if pgno == 0 {
            return Err(KeelError::Invalid("page numbers start at 1"));
        }
        let mut buf = vec![0u8; PAGE_SIZE].into_boxed_slice();
        self.io.read_at(page_offset(pgno), &mut buf)?;
        Ok(Page::new(pgno, buf))
    }

    fn writeback(&self, _pgno: PageNo, page: &Page) -> Result<()> {
        if page.is_dirty() {
            self.flush(page)?;
        }
        Ok(())
    }
}

fn page_offset(pgno: PageNo) -> u64 {
    u64::from(pgno - 1) * PAGE_SIZE as u64
}

/// Fixed-size page file fronted by a reference-counted page cache.
pub struct PageStore {
    cache: Arc<RefCache<PageLoader>>,
    io: Arc<dyn FileIo>,
    page_count: AtomicU32,
}

impl PageStore {
    /// Creates an empty page file at `path`.
    pub fn create(path: impl AsRef<Path>, cache_pages: usize) -> Result<Self> {
        let io = StdFileIo::create(path.as_ref())?;
        info!(path = %path.as_ref().display(), "pager.create");
        Self::with_io(Arc::new(io), cache_pages)
    }

    /// Opens an existing page file at `path`.
    pub fn open(path: impl AsRef<Path>, cache_pages: usize) -> Result<Self> {
        let io = StdFileIo::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "pager.open");
        Self::with_io(Arc::new(io), cache_pages)
    }

    /// Builds a store over any [`FileIo`]. The page count is taken from the file length.
    pub fn with_io(io: Arc<dyn FileIo>, cache_pages: usize) -> Result<Self> {
        let cache_pages = if cache_pages < MIN_CACHE_PAGES {
            warn!(
                requested = cache_pages,
                used = MIN_CACHE_PAGES,
                "pager.cache_too_small"
            );
            MIN_CACHE_PAGES
        } else {
            cache_pages
        };
        let len = io.len()?;
        let page_count = PageNo::try_from(len / PAGE_SIZE as u64)
            .map_err(|_| KeelError::Corruption("page file too large"))?;
        let loader = PageLoader { io: Arc::clone(&io) };
        Ok(Self {
            cache: RefCache::new(loader, cache_pages),
            io,
            page_count: AtomicU32::new(page_count),
        })
    }

    /// Appends a page initialized with `init` and flushes it right away.
    pub fn new_page(&self, init: &[u8]) -> Result<PageNo> {
        if init.len() != PAGE_SIZE {
            return Err(KeelError::Invalid("page image must be exactly one page"));
        }
        let pgno = self.page_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.io.write_at(page_offset(pgno), init)?;
        self.io.sync_all()?;
        debug!(pgno, "pager.new_page");
        Ok(pgno)
    }

    /// Returns a handle to page `pgno`, reading it from disk if it is not cached.
    pub fn get_page(&self, pgno: PageNo) -> Result<PageHandle> {
        self.cache.get(pgno)
    }

    /// Writes the page to disk immediately, whether or not it is dirty.
    pub fn flush_page(&self, page: &Page) -> Result<()> {
        self.cache.loader().flush(page)
    }

    /// Cuts (or zero-extends) the file to exactly `max_pgno` pages.
    pub fn truncate_to(&self, max_pgno: PageNo) -> Result<()> {
        self.io.truncate(u64::from(max_pgno) * PAGE_SIZE as u64)?;
        self.page_count.store(max_pgno, Ordering::SeqCst);
        debug!(max_pgno, "pager.truncate");
        Ok(())
    }

    /// Number of pages in the file.
    pub fn page_count(&self) -> PageNo {
        self.page_count.load(Ordering::SeqCst)
    }

    /// Flushes every cached page and syncs the file.
    pub fn close(&self) -> Result<()> {
        self.cache.close_all()?;
        self.io.sync_all()
    }
}
