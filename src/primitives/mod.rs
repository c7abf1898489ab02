//! Low-level primitives for building the storage engine.
//!
//! Positioned file I/O, the reference-counted cache, the page file, the
//! write-ahead log and the cross-process database lock.

/// Generic reference-counted resource cache.
///
/// Used for pages and for decoded records.
pub mod cache;

/// Cross-process exclusion for an open database.
pub mod concurrency;

/// Positioned file I/O abstraction.
pub mod io;

/// Paging subsystem: the `.db` file and its page formats.
pub mod pager;

/// Write-ahead logging (WAL) for crash recovery.
///
/// Ensures durability through sequential logging of page mutations.
pub mod wal;
