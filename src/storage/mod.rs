//! Transactional storage engine.
//!
//! Layers, leaves first: the transaction status file, the data manager
//! (records, free-space index, recovery), the B+Tree index whose nodes are
//! data manager records, and the version manager that adds MVCC and the
//! lock table on top.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Persistent B+Tree index over `i64` keys.
pub mod btree;

/// Record storage, write-ahead logging of record changes, and recovery.
pub mod dm;

/// Multi-version concurrency control and write-write conflict locking.
pub mod mvcc;

mod options;
mod txn;

pub use options::{EngineOptions, DEFAULT_CACHE_BYTES};
pub use txn::{TransactionManager, TxnStatus};

/// Suffix of the transaction status file.
pub const XID_SUFFIX: &str = ".xid";
/// Suffix of the page file.
pub const DB_SUFFIX: &str = ".db";
/// Suffix of the write-ahead log.
pub const LOG_SUFFIX: &str = ".log";

/// Path of one of a database's files: `base` with `suffix` appended.
pub fn db_file(base: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
