//! KeelDB: a small transactional storage engine with MVCC, a B+Tree index,
//! a write-ahead log and a line-oriented SQL front end.

#![warn(missing_docs)]

pub mod catalog;
pub mod config;
pub mod db;
pub mod primitives;
pub mod query;
pub mod server;
pub mod storage;
pub mod types;

pub use db::Database;
pub use types::{KeelError, Result};
