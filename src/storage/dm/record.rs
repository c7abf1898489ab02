use std::ops::Range;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::warn;

use super::log_record::LogRecord;
use crate::primitives::pager::{data_page, PageHandle, PAGE_SIZE};
use crate::primitives::wal::Wal;
use crate::types::{KeelError, Result, Uid, Xid};

const OF_VALID: usize = 0;
const OF_SIZE: usize = 1;
const OF_DATA: usize = 3;

const VALID: u8 = 0;
const INVALID: u8 = 1;

/// Largest payload a record can carry.
pub const MAX_RECORD_DATA: usize = data_page::MAX_FREE_SPACE - OF_DATA;

/// Builds the on-page image `[valid:1][size:2][data]` for a new record.
pub fn wrap(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > MAX_RECORD_DATA {
        return Err(KeelError::DataTooLarge);
    }
    let mut raw = Vec::with_capacity(OF_DATA + data.len());
    raw.push(VALID);
    raw.extend_from_slice(&(data.len() as u16).to_be_bytes());
    raw.extend_from_slice(data);
    Ok(raw)
}

/// Clears the valid flag of a record image.
pub fn set_raw_invalid(raw: &mut [u8]) {
    raw[OF_VALID] = INVALID;
}

/// A record living inside a cached page.
///
/// Holding a `DataItem` keeps its page pinned. Reads take the record lock
/// shared; [`DataItem::before`] takes it exclusively for a logged rewrite.
pub struct DataItem {
    uid: Uid,
    page: PageHandle,
    raw: Range<usize>,
    lock: RwLock<()>,
    wal: Arc<Wal>,
}

impl DataItem {
    pub(crate) fn parse(page: PageHandle, uid: Uid, wal: Arc<Wal>) -> Result<Self> {
        let start = usize::from(uid.offset());
        let size = {
            let buf = page.data();
            if start < 2 || start + OF_DATA > PAGE_SIZE {
                return Err(KeelError::Corruption("record offset outside page"));
            }
            usize::from(u16::from_be_bytes([
                buf[start + OF_SIZE],
                buf[start + OF_SIZE + 1],
            ]))
        };
        let end = start + OF_DATA + size;
        if end > PAGE_SIZE {
            return Err(KeelError::Corruption("record runs past page end"));
        }
        Ok(Self {
            uid,
            page,
            raw: start..end,
            lock: RwLock::new(()),
            wal,
        })
    }

    /// Identifier of this record.
    pub fn uid(&self) -> Uid {
        self.uid
    }

    fn data_range(&self) -> Range<usize> {
        self.raw.start + OF_DATA..self.raw.end
    }

    /// Length of the payload.
    pub fn len(&self) -> usize {
        self.raw.len() - OF_DATA
    }

    /// True if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// False once the record has been logically deleted by an undo.
    pub fn is_valid(&self) -> bool {
        let _shared = self.lock.read();
        self.page.data()[self.raw.start + OF_VALID] == VALID
    }

    /// Runs `f` over the payload under the shared record lock.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let _shared = self.lock.read();
        let buf = self.page.data();
        f(&buf[self.data_range()])
    }

    /// Copy of the payload.
    pub fn data(&self) -> Vec<u8> {
        self.with_data(<[u8]>::to_vec)
    }

    /// Starts a logged in-place rewrite: locks the record, marks the page
    /// dirty and keeps the pre-image.
    pub fn before(&self) -> RecordWriter<'_> {
        let guard = self.lock.write();
        self.page.set_dirty(true);
        let old_raw = self.page.data()[self.raw.clone()].to_vec();
        RecordWriter {
            item: self,
            _guard: guard,
            old_raw,
            finished: false,
        }
    }
}

/// Exclusive access to a record between [`DataItem::before`] and
/// [`RecordWriter::after`]. Dropping it without `after` restores the pre-image.
pub struct RecordWriter<'a> {
    item: &'a DataItem,
    _guard: RwLockWriteGuard<'a, ()>,
    old_raw: Vec<u8>,
    finished: bool,
}

impl RecordWriter<'_> {
    /// Runs `f` over the payload being rewritten.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let buf = self.item.page.data();
        f(&buf[self.item.data_range()])
    }

    /// Mutates the payload in place.
    pub fn write<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut buf = self.item.page.data_mut();
        f(&mut buf[self.item.data_range()])
    }

    /// Logs the change as an update by `xid` and releases the record.
    pub fn after(mut self, xid: Xid) -> Result<()> {
        let new_raw = self.item.page.data()[self.item.raw.clone()].to_vec();
        let record = LogRecord::Update {
            xid,
            uid: self.item.uid,
            old_raw: self.old_raw.clone(),
            new_raw,
        };
        // on failure the drop below puts the pre-image back
        self.item.wal.append(&record.encode())?;
        self.finished = true;
        Ok(())
    }

    /// Restores the pre-image and releases the record without logging.
    pub fn un_before(mut self) {
        self.restore();
        self.finished = true;
    }

    fn restore(&mut self) {
        let mut buf = self.item.page.data_mut();
        buf[self.item.raw.clone()].copy_from_slice(&self.old_raw);
    }
}

impl Drop for RecordWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(uid = %self.item.uid, "record rewrite abandoned; restoring pre-image");
            self.restore();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_prefixes_flag_and_size() {
        assert_eq!(wrap(b"ab").unwrap(), vec![0, 0, 2, b'a', b'b']);
        assert!(matches!(
            wrap(&vec![0u8; MAX_RECORD_DATA + 1]),
            Err(KeelError::DataTooLarge)
        ));
        let mut raw = wrap(b"x").unwrap();
        set_raw_invalid(&mut raw);
        assert_eq!(raw[0], INVALID);
    }
}
