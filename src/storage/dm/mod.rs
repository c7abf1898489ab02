//! Record storage on top of the page file and the write-ahead log.
//!
//! Records are addressed by [`Uid`] and never move. Every page mutation is
//! logged before it is applied: inserts by [`DataManager::insert`], in-place
//! rewrites by [`record::RecordWriter::after`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::primitives::cache::{Handle, Loader, RefCache};
use crate::primitives::pager::{data_page, page_one, PageHandle, PageStore};
use crate::primitives::wal::Wal;
use crate::storage::options::EngineOptions;
use crate::storage::txn::TransactionManager;
use crate::storage::{db_file, DB_SUFFIX, LOG_SUFFIX};
use crate::types::{KeelError, PageNo, Result, Uid, Xid};

mod free_space;
mod log_record;
mod record;
mod recovery;

pub use free_space::{FreeSpaceIndex, PageInfo};
pub use log_record::LogRecord;
pub use record::{DataItem, RecordWriter, MAX_RECORD_DATA};
pub use recovery::{recover, RecoveryStats};

const MAX_INSERT_ATTEMPTS: usize = 5;

/// Counted reference to a cached record.
pub type Record = Handle<RecordLoader>;

/// Decodes records out of their pages for the record cache.
pub struct RecordLoader {
    pages: Arc<PageStore>,
    wal: Arc<Wal>,
}

impl Loader for RecordLoader {
    type Key = Uid;
    type Value = DataItem;

    fn load(&self, uid: Uid) -> Result<DataItem> {
        let page = self.pages.get_page(uid.pgno())?;
        DataItem::parse(page, uid, Arc::clone(&self.wal))
    }

    fn writeback(&self, _uid: Uid, _item: &DataItem) -> Result<()> {
        // the page handle inside the item is released when it drops
        Ok(())
    }
}

/// Atomic insert, read and logged rewrite of byte records.
pub struct DataManager {
    pages: Arc<PageStore>,
    wal: Arc<Wal>,
    records: Arc<RefCache<RecordLoader>>,
    free_space: FreeSpaceIndex,
    page_one: Mutex<Option<PageHandle>>,
    recovery: Option<RecoveryStats>,
    closed: AtomicBool,
}

impl DataManager {
    /// Creates the `.db` and `.log` files for a new database.
    pub fn create(base: &Path, options: &EngineOptions) -> Result<Self> {
        let pages = Arc::new(PageStore::create(
            db_file(base, DB_SUFFIX),
            options.page_cache_pages(),
        )?);
        let wal = Arc::new(Wal::create(db_file(base, LOG_SUFFIX))?);
        let pgno = pages.new_page(&page_one::init_raw())?;
        debug_assert_eq!(pgno, 1);
        let page_one = pages.get_page(1)?;
        pages.flush_page(&page_one)?;
        Ok(Self::assemble(pages, wal, page_one, options, None))
    }

    /// Opens an existing database, recovering it first if it was not closed cleanly.
    pub fn open(base: &Path, options: &EngineOptions, tm: &TransactionManager) -> Result<Self> {
        let pages = Arc::new(PageStore::open(
            db_file(base, DB_SUFFIX),
            options.page_cache_pages(),
        )?);
        let wal = Arc::new(Wal::open(db_file(base, LOG_SUFFIX))?);
        let page_one = pages.get_page(1)?;
        let recovery = if page_one::check_vc(&page_one) {
            None
        } else {
            info!("data manager was not closed cleanly");
            Some(recover(tm, &wal, &pages)?)
        };
        let dm = Self::assemble(pages, wal, page_one, options, recovery);
        dm.fill_free_space()?;
        if let Some(page_one) = dm.page_one.lock().as_ref() {
            page_one::set_vc_open(page_one);
            dm.pages.flush_page(page_one)?;
        }
        Ok(dm)
    }

    fn assemble(
        pages: Arc<PageStore>,
        wal: Arc<Wal>,
        page_one: PageHandle,
        options: &EngineOptions,
        recovery: Option<RecoveryStats>,
    ) -> Self {
        let loader = RecordLoader {
            pages: Arc::clone(&pages),
            wal: Arc::clone(&wal),
        };
        Self {
            pages,
            wal,
            records: RefCache::new(loader, options.record_cache_capacity),
            free_space: FreeSpaceIndex::new(),
            page_one: Mutex::new(Some(page_one)),
            recovery,
            closed: AtomicBool::new(false),
        }
    }

    fn fill_free_space(&self) -> Result<()> {
        for pgno in 2..=self.pages.page_count() {
            let page = self.pages.get_page(pgno)?;
            self.free_space.add(pgno, data_page::free_space(&page));
        }
        debug!(pages = self.free_space.len(), "dm.free_space filled");
        Ok(())
    }

    /// Stores `data` as a new record written by `xid`.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        self.ensure_open()?;
        let raw = record::wrap(data)?;

        let mut picked = None;
        for _ in 0..MAX_INSERT_ATTEMPTS {
            if let Some(info) = self.free_space.select(raw.len()) {
                picked = Some(info);
                break;
            }
            let pgno = self.pages.new_page(&data_page::init_raw())?;
            self.free_space.add(pgno, data_page::MAX_FREE_SPACE);
        }
        let info = picked.ok_or(KeelError::DatabaseBusy)?;

        let page = match self.pages.get_page(info.pgno) {
            Ok(page) => page,
            Err(err) => {
                self.free_space.add(info.pgno, info.free);
                return Err(err);
            }
        };
        let inserted = self.insert_into(&page, xid, &raw);
        self.free_space.add(info.pgno, data_page::free_space(&page));
        inserted
    }

    fn insert_into(&self, page: &PageHandle, xid: Xid, raw: &[u8]) -> Result<Uid> {
        let pgno = page.pgno();
        let offset = data_page::fso(&page.data());
        let record = LogRecord::Insert {
            xid,
            pgno,
            offset,
            raw: raw.to_vec(),
        };
        self.wal.append(&record.encode())?;
        let at = data_page::insert(page, raw)?;
        Ok(Uid::new(pgno, at))
    }

    /// Returns the record at `uid`, or `None` if it has been invalidated.
    pub fn read(&self, uid: Uid) -> Result<Option<Record>> {
        self.ensure_open()?;
        let record = self.records.get(uid)?;
        if record.is_valid() {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    /// Recovery report of the last open, if recovery ran.
    pub fn last_recovery(&self) -> Option<RecoveryStats> {
        self.recovery
    }

    /// Number of pages in the data file.
    pub fn page_count(&self) -> PageNo {
        self.pages.page_count()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KeelError::Closed);
        }
        Ok(())
    }

    /// Flushes everything and stamps page 1 as cleanly closed. Later
    /// inserts and reads fail with [`KeelError::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.records.close_all()?;
        self.wal.close()?;
        if let Some(page_one) = self.page_one.lock().take() {
            page_one::set_vc_close(&page_one);
            self.pages.flush_page(&page_one)?;
            page_one.release()?;
        }
        self.pages.close()?;
        info!("dm.close");
        Ok(())
    }
}
