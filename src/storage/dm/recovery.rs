//! Redo/undo recovery run when page 1 shows an unclean shutdown.
//!
//! Redo replays every record of a transaction that is no longer active,
//! committed or aborted alike: index entries are never removed, so an
//! aborted row must still exist physically for the index to point at, and
//! visibility hides it. Undo then walks each still-active transaction's
//! records backwards and marks it aborted.

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::log_record::LogRecord;
use super::record::set_raw_invalid;
use crate::primitives::pager::{data_page, PageStore};
use crate::primitives::wal::Wal;
use crate::storage::txn::TransactionManager;
use crate::types::{PageNo, Result, Xid};

/// What a recovery run did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RecoveryStats {
    /// Page count the file was cut or extended to.
    pub max_pgno: PageNo,
    /// Records replayed forwards.
    pub redone: usize,
    /// Records rolled back.
    pub undone: usize,
    /// Transactions forced to aborted.
    pub aborted: usize,
}

#[derive(Clone, Copy)]
enum Pass {
    Redo,
    Undo,
}

/// Brings the page file back in line with the log.
pub fn recover(tm: &TransactionManager, wal: &Wal, pages: &PageStore) -> Result<RecoveryStats> {
    info!("recovery.start");
    let mut stats = RecoveryStats::default();

    wal.rewind();
    let mut max_pgno = 0;
    while let Some(payload) = wal.next()? {
        max_pgno = max_pgno.max(LogRecord::decode(&payload)?.pgno());
    }
    stats.max_pgno = max_pgno.max(1);
    pages.truncate_to(stats.max_pgno)?;
    debug!(max_pgno = stats.max_pgno, "recovery.truncate");

    wal.rewind();
    while let Some(payload) = wal.next()? {
        let record = LogRecord::decode(&payload)?;
        if !tm.is_active(record.xid())? {
            apply(pages, &record, Pass::Redo)?;
            stats.redone += 1;
        }
    }

    let mut pending: BTreeMap<Xid, Vec<LogRecord>> = BTreeMap::new();
    wal.rewind();
    while let Some(payload) = wal.next()? {
        let record = LogRecord::decode(&payload)?;
        if tm.is_active(record.xid())? {
            pending.entry(record.xid()).or_default().push(record);
        }
    }
    for (xid, records) in pending {
        for record in records.iter().rev() {
            apply(pages, record, Pass::Undo)?;
            stats.undone += 1;
        }
        tm.abort(xid)?;
        stats.aborted += 1;
    }

    info!(
        redone = stats.redone,
        undone = stats.undone,
        aborted = stats.aborted,
        "recovery.finish"
    );
    Ok(stats)
}

fn apply(pages: &PageStore, record: &LogRecord, pass: Pass) -> Result<()> {
    match record {
        LogRecord::Insert {
            pgno, offset, raw, ..
        } => {
            let page = pages.get_page(*pgno)?;
            match pass {
                Pass::Redo => data_page::recover_insert(&page, raw, *offset),
                Pass::Undo => {
                    let mut dead = raw.clone();
                    set_raw_invalid(&mut dead);
                    data_page::recover_insert(&page, &dead, *offset)
                }
            }
        }
        LogRecord::Update {
            uid,
            old_raw,
            new_raw,
            ..
        } => {
            let page = pages.get_page(uid.pgno())?;
            let image = match pass {
                Pass::Redo => new_raw,
                Pass::Undo => old_raw,
            };
            data_page::recover_update(&page, image, uid.offset())
        }
    }
}
