//! Visibility of an entry version to a transaction.
//!
//! `committed` answers whether a transaction has committed; it is the
//! transaction manager in the engine and a plain set in tests.

use crate::types::{Result, Xid};

use super::entry::Versions;
use super::transaction::{IsolationLevel, Transaction};

/// Whether `txn` may observe the version.
pub(crate) fn is_visible(
    txn: &Transaction,
    v: Versions,
    committed: impl Fn(Xid) -> Result<bool>,
) -> Result<bool> {
    let xid = txn.xid;
    if v.xmin == xid && v.xmax == 0 {
        return Ok(true);
    }
    match txn.level {
        IsolationLevel::ReadCommitted => {
            if !committed(v.xmin)? {
                return Ok(false);
            }
            if v.xmax == 0 {
                return Ok(true);
            }
            Ok(v.xmax != xid && !committed(v.xmax)?)
        }
        IsolationLevel::RepeatableRead => {
            if !committed(v.xmin)? || v.xmin >= xid || txn.in_snapshot(v.xmin) {
                return Ok(false);
            }
            if v.xmax == 0 {
                return Ok(true);
            }
            if v.xmax == xid {
                return Ok(false);
            }
            Ok(!committed(v.xmax)? || v.xmax > xid || txn.in_snapshot(v.xmax))
        }
    }
}

/// Whether deleting the version would skip over a deletion that committed
/// after `txn` began. Never true under read committed.
pub(crate) fn is_version_skip(
    txn: &Transaction,
    v: Versions,
    committed: impl Fn(Xid) -> Result<bool>,
) -> Result<bool> {
    if txn.level == IsolationLevel::ReadCommitted || v.xmax == 0 {
        return Ok(false);
    }
    Ok(committed(v.xmax)? && (v.xmax > txn.xid || txn.in_snapshot(v.xmax)))
}
