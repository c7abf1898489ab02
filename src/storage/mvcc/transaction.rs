use std::collections::HashSet;

use parking_lot::Mutex;

use crate::types::{KeelError, Xid};

/// How much of concurrent transactions' work a transaction may observe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Sees every version committed by the time of each read.
    #[default]
    ReadCommitted,
    /// Sees only versions committed before the transaction began.
    RepeatableRead,
}

/// Reason a transaction was aborted on its owner's behalf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Failure {
    Deadlock,
    ConcurrentUpdate,
}

impl From<Failure> for KeelError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Deadlock => KeelError::Deadlock,
            Failure::ConcurrentUpdate => KeelError::ConcurrentUpdate,
        }
    }
}

/// In-memory state of one running transaction.
pub(crate) struct Transaction {
    pub xid: Xid,
    pub level: IsolationLevel,
    /// Transactions active when this one began; empty under read committed.
    snapshot: HashSet<Xid>,
    failure: Mutex<Option<Failure>>,
}

impl Transaction {
    pub(crate) fn new(xid: Xid, level: IsolationLevel, active: impl IntoIterator<Item = Xid>) -> Self {
        let snapshot = match level {
            IsolationLevel::ReadCommitted => HashSet::new(),
            IsolationLevel::RepeatableRead => active.into_iter().collect(),
        };
        Self {
            xid,
            level,
            snapshot,
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn in_snapshot(&self, xid: Xid) -> bool {
        self.snapshot.contains(&xid)
    }

    pub(crate) fn failure(&self) -> Option<Failure> {
        *self.failure.lock()
    }

    /// Records the failure; returns false if one was already recorded.
    pub(crate) fn fail(&self, failure: Failure) -> bool {
        let mut slot = self.failure.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(failure);
        true
    }
}
