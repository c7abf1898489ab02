use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::PageNo;

/// In-memory copy of one page plus its dirty flag.
///
/// The buffer latch is held only for the duration of a byte copy; record
/// level locking lives above this type.
pub struct Page {
    pgno: PageNo,
    buf: RwLock<Box<[u8]>>,
    dirty: AtomicBool,
}

impl Page {
    /// Wraps a page image read from disk.
    pub fn new(pgno: PageNo, buf: Box<[u8]>) -> Self {
        Self {
            pgno,
            buf: RwLock::new(buf),
            dirty: AtomicBool::new(false),
        }
    }

    /// Page number.
    pub fn pgno(&self) -> PageNo {
        self.pgno
    }

    /// Shared access to the page bytes.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.buf.read()
    }

    /// Exclusive access to the page bytes. Marks the page dirty.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.set_dirty(true);
        self.buf.write()
    }

    /// Whether the page has unflushed changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets or clears the dirty flag.
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Copies the page image, clearing the dirty flag first so that writes
    /// racing with a flush mark the page dirty again.
    pub(crate) fn snapshot_for_flush(&self) -> Vec<u8> {
        self.set_dirty(false);
        self.buf.read().to_vec()
    }
}
