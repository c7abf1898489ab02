//! Transaction status file (`.xid`).
//!
//! Layout: `[counter:8]` followed by one status byte per transaction, the
//! byte for xid `n` living at offset `8 + (n - 1)`. xid 0 has no byte: it is
//! the super-transaction and always counts as committed.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{KeelError, Result, Xid, SUPER_XID};

const HEADER_LEN: u64 = 8;

/// Persisted state of a transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxnStatus {
    /// Started, not yet finished.
    Active,
    /// Finished successfully.
    Committed,
    /// Rolled back.
    Aborted,
}

impl TxnStatus {
    fn to_byte(self) -> u8 {
        match self {
            TxnStatus::Active => 0,
            TxnStatus::Committed => 1,
            TxnStatus::Aborted => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(TxnStatus::Active),
            1 => Ok(TxnStatus::Committed),
            2 => Ok(TxnStatus::Aborted),
            _ => Err(KeelError::Corruption("unknown transaction status")),
        }
    }
}

/// Allocates xids and records their final status.
pub struct TransactionManager {
    io: Arc<dyn FileIo>,
    /// Highest xid handed out so far.
    counter: Mutex<u64>,
}

impl TransactionManager {
    /// Creates a new `.xid` file with a zero counter.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::create(path.as_ref())?);
        io.write_at(0, &0u64.to_be_bytes())?;
        io.sync_all()?;
        info!(path = %path.as_ref().display(), "txn.create");
        Ok(Self {
            io,
            counter: Mutex::new(0),
        })
    }

    /// Opens an existing `.xid` file, checking its length against the counter.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(path.as_ref())?);
        let len = io.len()?;
        if len < HEADER_LEN {
            return Err(KeelError::Corruption("bad xid file"));
        }
        let mut raw = [0u8; 8];
        io.read_at(0, &mut raw)?;
        let counter = u64::from_be_bytes(raw);
        if HEADER_LEN.checked_add(counter) != Some(len) {
            return Err(KeelError::Corruption("bad xid file"));
        }
        info!(path = %path.as_ref().display(), counter, "txn.open");
        Ok(Self {
            io,
            counter: Mutex::new(counter),
        })
    }

    /// Starts a new transaction and returns its xid.
    pub fn begin(&self) -> Result<Xid> {
        let mut counter = self.counter.lock();
        let xid = *counter + 1;
        self.write_status(xid, TxnStatus::Active)?;
        self.io.write_at(0, &xid.to_be_bytes())?;
        self.io.sync_all()?;
        *counter = xid;
        Ok(xid)
    }

    /// Marks `xid` committed.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.finish(xid, TxnStatus::Committed)
    }

    /// Marks `xid` aborted.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.finish(xid, TxnStatus::Aborted)
    }

    fn finish(&self, xid: Xid, status: TxnStatus) -> Result<()> {
        if xid == SUPER_XID {
            return Err(KeelError::Invalid("super transaction cannot finish"));
        }
        self.write_status(xid, status)?;
        self.io.sync_all()
    }

    fn write_status(&self, xid: Xid, status: TxnStatus) -> Result<()> {
        self.io.write_at(status_offset(xid), &[status.to_byte()])
    }

    /// Status of `xid` as recorded in the file.
    pub fn status(&self, xid: Xid) -> Result<TxnStatus> {
        if xid == SUPER_XID {
            return Ok(TxnStatus::Committed);
        }
        if xid > *self.counter.lock() {
            return Err(KeelError::Invalid("unknown xid"));
        }
        let mut raw = [0u8; 1];
        self.io.read_at(status_offset(xid), &mut raw)?;
        TxnStatus::from_byte(raw[0])
    }

    /// True if `xid` is still active.
    pub fn is_active(&self, xid: Xid) -> Result<bool> {
        Ok(self.status(xid)? == TxnStatus::Active)
    }

    /// True if `xid` committed.
    pub fn is_committed(&self, xid: Xid) -> Result<bool> {
        Ok(self.status(xid)? == TxnStatus::Committed)
    }

    /// True if `xid` aborted.
    pub fn is_aborted(&self, xid: Xid) -> Result<bool> {
        Ok(self.status(xid)? == TxnStatus::Aborted)
    }

    /// Highest xid allocated so far.
    pub fn max_xid(&self) -> Xid {
        *self.counter.lock()
    }

    /// Syncs the file.
    pub fn close(&self) -> Result<()> {
        self.io.sync_all()
    }
}

fn status_offset(xid: Xid) -> u64 {
    HEADER_LEN + (xid - 1)
}
