//! Table catalog and row operations.
//!
//! Tables live in a linked list of records whose head uid is kept in the
//! [`Booter`] file. Table and field records are written by the super
//! transaction, so a `create table` is durable and visible to everyone as
//! soon as it returns, independent of the caller's transaction. Row writes
//! go through the [`VersionManager`] under the caller's xid.
//!
//! Every statement runs under a shared gate. [`TableManager::close`] aborts
//! the running transactions and then takes the gate exclusively, so once it
//! returns no statement is still touching storage.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info};

use crate::query::{CreateTable, Delete, Insert, Select, Update};
use crate::storage::mvcc::{IsolationLevel, VersionManager};
use crate::types::{KeelError, Result, Uid, Xid, SUPER_XID};

mod booter;
mod field;
mod table;

pub use booter::{Booter, BOOTER_SUFFIX};
pub use field::{Field, Value};
pub use table::Table;

/// Owns the table list and routes statements to tables.
pub struct TableManager {
    vm: Arc<VersionManager>,
    booter: Booter,
    tables: RwLock<BTreeMap<String, Arc<Table>>>,
    /// Serializes `create table` so list head updates never interleave.
    create_lock: Mutex<()>,
    gate: RwLock<()>,
}

impl TableManager {
    /// Creates an empty catalog next to `base`.
    pub fn create(base: &Path, vm: Arc<VersionManager>) -> Result<Self> {
        let booter = Booter::create(base, Uid::NULL)?;
        Ok(Self {
            vm,
            booter,
            tables: RwLock::new(BTreeMap::new()),
            create_lock: Mutex::new(()),
            gate: RwLock::new(()),
        })
    }

    /// Opens the catalog and loads every table in the list.
    pub fn open(base: &Path, vm: Arc<VersionManager>) -> Result<Self> {
        let booter = Booter::open(base)?;
        let mut tables = BTreeMap::new();
        let mut next = booter.load()?;
        while !next.is_null() {
            let table = Table::load(&vm, next)?;
            next = table.next();
            tables.insert(table.name().to_string(), Arc::new(table));
        }
        info!(tables = tables.len(), "catalog.open");
        Ok(Self {
            vm,
            booter,
            tables: RwLock::new(tables),
            create_lock: Mutex::new(()),
            gate: RwLock::new(()),
        })
    }

    /// Version manager the catalog writes through.
    pub fn version_manager(&self) -> &Arc<VersionManager> {
        &self.vm
    }

    fn enter(&self) -> Result<RwLockReadGuard<'_, ()>> {
        let guard = self.gate.read();
        if self.vm.is_closed() {
            return Err(KeelError::Closed);
        }
        Ok(guard)
    }

    /// Aborts every running transaction and waits for statements in flight
    /// to return. Later statements fail with [`KeelError::Closed`].
    pub fn close(&self) -> Result<()> {
        let aborted = self.vm.close();
        let _drained = self.gate.write();
        let aborted = aborted?;
        info!(aborted, "catalog.close");
        Ok(())
    }

    /// Starts a transaction.
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        let _gate = self.enter()?;
        self.vm.begin(level)
    }

    /// Commits a transaction.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        let _gate = self.enter()?;
        self.vm.commit(xid)
    }

    /// Aborts a transaction.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        let _gate = self.enter()?;
        self.vm.abort(xid)
    }

    /// Creates a table and puts it at the head of the list.
    pub fn create_table(&self, stmt: &CreateTable) -> Result<()> {
        let _gate = self.enter()?;
        let _create = self.create_lock.lock();
        if self.tables.read().contains_key(&stmt.table) {
            return Err(KeelError::DuplicatedTable(stmt.table.clone()));
        }
        let head = self.booter.load()?;
        let table = Table::create(&self.vm, SUPER_XID, head, stmt)?;
        self.booter.update(table.uid())?;
        debug!(table = %stmt.table, "catalog.create_table");
        self.tables
            .write()
            .insert(stmt.table.clone(), Arc::new(table));
        Ok(())
    }

    /// Every table, one per line, in name order.
    pub fn show(&self) -> String {
        let tables = self.tables.read();
        let lines: Vec<String> = tables.values().map(|table| table.to_string()).collect();
        lines.join("\n")
    }

    /// Names of all tables in name order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| KeelError::TableNotFound(name.to_string()))
    }

    /// Inserts one row.
    pub fn insert(&self, xid: Xid, stmt: &Insert) -> Result<()> {
        let _gate = self.enter()?;
        self.table(&stmt.table)?.insert(&self.vm, xid, &stmt.values)
    }

    /// Selects rows visible to `xid`.
    pub fn select(&self, xid: Xid, stmt: &Select) -> Result<String> {
        let _gate = self.enter()?;
        self.table(&stmt.table)?.select(&self.vm, xid, stmt)
    }

    /// Deletes matching rows; returns how many.
    pub fn delete(&self, xid: Xid, stmt: &Delete) -> Result<usize> {
        let _gate = self.enter()?;
        self.table(&stmt.table)?.delete(&self.vm, xid, &stmt.filter)
    }

    /// Updates matching rows; returns how many.
    pub fn update(&self, xid: Xid, stmt: &Update) -> Result<usize> {
        let _gate = self.enter()?;
        self.table(&stmt.table)?.update(&self.vm, xid, stmt)
    }
}
