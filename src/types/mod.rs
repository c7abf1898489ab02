//! Identifiers, the crate-wide error type and checksums shared by every layer.
#![forbid(unsafe_code)]

use std::fmt;
use std::path::PathBuf;

/// Rolling checksums used by the write-ahead log and string index keys.
pub mod checksum;

pub use checksum::{string_key, Checksum, Rolling13331};

/// Page number inside the `.db` file. Page numbers start at 1.
pub type PageNo = u32;

/// Transaction identifier. See [`SUPER_XID`].
pub type Xid = u64;

/// The permanent super-transaction: always committed, never active.
pub const SUPER_XID: Xid = 0;

/// Global record identifier: `(page << 32) | offset`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Uid(pub u64);

impl Uid {
    /// Null uid, used as an end-of-chain marker.
    pub const NULL: Uid = Uid(0);

    /// Builds a uid from the owning page and the in-page offset.
    pub fn new(pgno: PageNo, offset: u16) -> Self {
        Uid((u64::from(pgno) << 32) | u64::from(offset))
    }

    /// Page holding the record.
    pub fn pgno(self) -> PageNo {
        (self.0 >> 32) as PageNo
    }

    /// Byte offset of the record within its page.
    pub fn offset(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    /// Returns true for the null uid.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pgno(), self.offset())
    }
}

impl From<u64> for Uid {
    fn from(value: u64) -> Self {
        Uid(value)
    }
}

impl From<Uid> for u64 {
    fn from(value: Uid) -> Self {
        value.0
    }
}

/// Errors produced by the engine and its collaborators.
#[derive(thiserror::Error, Debug)]
pub enum KeelError {
    /// Underlying file or socket failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk state that cannot be repaired locally.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Bad argument passed by a caller.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Bounded cache has no room for another resident entry.
    #[error("cache is full")]
    CacheFull,
    /// Record does not fit in a single page.
    #[error("data too large")]
    DataTooLarge,
    /// No page with enough free space could be obtained.
    #[error("database is busy")]
    DatabaseBusy,
    /// Lock request would close a wait-for cycle.
    #[error("deadlock")]
    Deadlock,
    /// Repeatable-read transaction tried to delete a newer version.
    #[error("concurrent update issue")]
    ConcurrentUpdate,
    /// `begin` inside an open transaction.
    #[error("nested transaction not supported")]
    NestedTransaction,
    /// `commit`/`abort` without an open transaction.
    #[error("not in transaction")]
    NoTransaction,
    /// Operation on a database that has been closed.
    #[error("database is closed")]
    Closed,
    /// Unknown table name.
    #[error("table not found: {0}")]
    TableNotFound(String),
    /// Unknown field name.
    #[error("field not found: {0}")]
    FieldNotFound(String),
    /// Lookup on a field without an index.
    #[error("field not indexed: {0}")]
    FieldNotIndexed(String),
    /// `create table` with a name already in use.
    #[error("duplicated table: {0}")]
    DuplicatedTable(String),
    /// `create table` without any indexed field.
    #[error("table has no index: {0}")]
    TableNoIndex(String),
    /// Value count or literal does not match the table schema.
    #[error("invalid values")]
    InvalidValues,
    /// `where` joins with something other than `and`/`or`.
    #[error("invalid logic operation")]
    InvalidLogicOp,
    /// Malformed statement, with a `<< ` marker at the failing token.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    /// Another process holds the database lock.
    #[error("database is locked by another process: {0}")]
    AlreadyLocked(PathBuf),
    /// `create` found an existing database file.
    #[error("file already exists: {0}")]
    FileExists(PathBuf),
    /// `open` is missing one of the database files.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, KeelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_packs_page_and_offset() {
        let uid = Uid::new(7, 1234);
        assert_eq!(uid.0, (7u64 << 32) | 1234);
        assert_eq!(uid.pgno(), 7);
        assert_eq!(uid.offset(), 1234);
        assert_eq!(uid.to_string(), "7:1234");
    }

    #[test]
    fn offset_ignores_bits_above_sixteen() {
        let uid = Uid((3u64 << 32) | 0x0001_0010);
        assert_eq!(uid.offset(), 0x10);
        assert_eq!(uid.pgno(), 3);
    }
}
