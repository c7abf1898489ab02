//! Versioned entries over the data manager.
//!
//! Every entry records the transaction that created it and the one that
//! deleted it; what a reader sees is decided by [`IsolationLevel`] and the
//! committed state in the transaction file. Deletes take an exclusive lock on
//! the entry through the [`LockTable`], held until commit or abort. A
//! transaction that loses a deadlock or hits a concurrent update is aborted
//! on the spot and keeps returning that error until its owner aborts it.
//! Closing aborts whatever is still running and refuses all later work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::storage::dm::DataManager;
use crate::storage::txn::TransactionManager;
use crate::types::{KeelError, Result, Uid, Xid, SUPER_XID};

mod entry;
mod lock_table;
mod transaction;
mod visibility;

pub use lock_table::{LockTable, Waiter};
pub use transaction::IsolationLevel;

use entry::Entry;
use transaction::{Failure, Transaction};

/// Transactional reads, inserts and deletes of versioned entries.
pub struct VersionManager {
    tm: Arc<TransactionManager>,
    dm: Arc<DataManager>,
    active: Mutex<HashMap<Xid, Arc<Transaction>>>,
    locks: LockTable,
    /// Only flipped while `active` is locked.
    closed: AtomicBool,
}

impl VersionManager {
    /// Builds a version manager over an open transaction file and data manager.
    pub fn new(tm: Arc<TransactionManager>, dm: Arc<DataManager>) -> Self {
        let mut active = HashMap::new();
        active.insert(
            SUPER_XID,
            Arc::new(Transaction::new(SUPER_XID, IsolationLevel::ReadCommitted, [])),
        );
        Self {
            tm,
            dm,
            active: Mutex::new(active),
            locks: LockTable::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Data manager underneath, for index structures that bypass versioning.
    pub fn data_manager(&self) -> &Arc<DataManager> {
        &self.dm
    }

    /// Starts a transaction. Under repeatable read it remembers every
    /// transaction active right now as concurrent.
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        let mut active = self.active.lock();
        self.ensure_open()?;
        let xid = self.tm.begin()?;
        let concurrent: Vec<Xid> = active.keys().copied().filter(|&x| x != SUPER_XID).collect();
        active.insert(xid, Arc::new(Transaction::new(xid, level, concurrent)));
        debug!(xid, ?level, "vm.begin");
        Ok(xid)
    }

    /// Payload of the entry at `uid` if `xid` can see it.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let txn = self.transaction(xid)?;
        let Some(entry) = Entry::load(&self.dm, uid)? else {
            return Ok(None);
        };
        if self.visible(&txn, &entry)? {
            Ok(Some(entry.data()))
        } else {
            Ok(None)
        }
    }

    /// Stores a new entry created by `xid`.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        self.transaction(xid)?;
        self.dm.insert(xid, &entry::wrap(xid, data))
    }

    /// Marks the entry at `uid` deleted by `xid`.
    ///
    /// Returns `false` when `xid` cannot see the entry or already deleted
    /// it. Blocks while another transaction holds the entry's lock.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        let txn = self.transaction(xid)?;
        let Some(entry) = Entry::load(&self.dm, uid)? else {
            return Ok(false);
        };
        if !self.visible(&txn, &entry)? {
            return Ok(false);
        }

        match self.locks.add(xid, uid) {
            Ok(Some(waiter)) => {
                waiter.wait();
                // woken without the lock if xid was aborted or the manager closed
                self.transaction(xid)?;
            }
            Ok(None) => {}
            Err(KeelError::Deadlock) => return Err(self.fail(&txn, Failure::Deadlock)),
            Err(err) => return Err(err),
        }

        let versions = entry.versions();
        if versions.xmax == xid {
            return Ok(false);
        }
        // the previous lock holder may have deleted it and committed meanwhile
        if !self.visible(&txn, &entry)? {
            return Ok(false);
        }
        if visibility::is_version_skip(&txn, versions, |x| self.tm.is_committed(x))? {
            return Err(self.fail(&txn, Failure::ConcurrentUpdate));
        }
        entry.set_xmax(xid)?;
        Ok(true)
    }

    /// Commits `xid` and releases its locks.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        let mut active = self.active.lock();
        let txn = self.lookup(&active, xid)?;
        self.tm.commit(xid)?;
        active.remove(&xid);
        drop(active);
        self.locks.remove(xid);
        debug!(xid, level = ?txn.level, "vm.commit");
        Ok(())
    }

    /// Aborts `xid` and releases its locks. Also clears a transaction that
    /// was already aborted on its owner's behalf.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        let txn = {
            let mut active = self.active.lock();
            self.ensure_open()?;
            active
                .remove(&xid)
                .ok_or(KeelError::Invalid("unknown transaction"))?
        };
        if txn.failure().is_none() {
            self.tm.abort(xid)?;
            self.locks.remove(xid);
        }
        debug!(xid, "vm.abort");
        Ok(())
    }

    /// Aborts every running transaction and refuses all later calls with
    /// [`KeelError::Closed`]. Threads blocked on a record lock wake up and
    /// fail the same way. Returns how many transactions were aborted.
    pub fn close(&self) -> Result<usize> {
        let mut active = self.active.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }
        let running: Vec<Arc<Transaction>> = active
            .drain()
            .filter(|(xid, _)| *xid != SUPER_XID)
            .map(|(_, txn)| txn)
            .collect();
        let mut first_err = None;
        let mut aborted = 0;
        for txn in &running {
            if txn.failure().is_none() {
                match self.tm.abort(txn.xid) {
                    Ok(()) => aborted += 1,
                    Err(err) => {
                        warn!(xid = txn.xid, error = %err, "vm.close abort failed");
                        first_err.get_or_insert(err);
                    }
                }
            }
            self.locks.remove(txn.xid);
        }
        drop(active);
        info!(aborted, "vm.close");
        match first_err {
            Some(err) => Err(err),
            None => Ok(aborted),
        }
    }

    /// Whether [`VersionManager::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of running transactions, not counting the super transaction.
    pub fn active_count(&self) -> usize {
        self.active.lock().len().saturating_sub(1)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(KeelError::Closed);
        }
        Ok(())
    }

    fn transaction(&self, xid: Xid) -> Result<Arc<Transaction>> {
        self.lookup(&self.active.lock(), xid)
    }

    fn lookup(&self, active: &HashMap<Xid, Arc<Transaction>>, xid: Xid) -> Result<Arc<Transaction>> {
        self.ensure_open()?;
        let txn = active
            .get(&xid)
            .cloned()
            .ok_or(KeelError::Invalid("unknown transaction"))?;
        match txn.failure() {
            Some(failure) => Err(failure.into()),
            None => Ok(txn),
        }
    }

    fn visible(&self, txn: &Transaction, entry: &Entry) -> Result<bool> {
        visibility::is_visible(txn, entry.versions(), |x| self.tm.is_committed(x))
    }

    /// Aborts `txn` on its owner's behalf, leaving it registered so every
    /// later call reports `failure`.
    fn fail(&self, txn: &Transaction, failure: Failure) -> KeelError {
        if txn.fail(failure) {
            warn!(xid = txn.xid, ?failure, "vm.auto_abort");
            if let Err(err) = self.tm.abort(txn.xid) {
                warn!(xid = txn.xid, error = %err, "vm.auto_abort failed to persist");
            }
            self.locks.remove(txn.xid);
        }
        failure.into()
    }
}
