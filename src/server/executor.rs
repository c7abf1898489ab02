//! Per-connection statement execution and transaction state.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::TableManager;
use crate::query::{parse, Statement};
use crate::storage::mvcc::IsolationLevel;
use crate::types::{KeelError, Result, Xid};

/// Runs statements for one client.
///
/// Outside `begin`/`commit` every statement runs in its own read-committed
/// transaction. Any error aborts the explicit transaction, if one is open.
pub struct Executor {
    catalog: Arc<TableManager>,
    xid: Option<Xid>,
}

impl Executor {
    /// Creates an executor with no open transaction.
    pub fn new(catalog: Arc<TableManager>) -> Self {
        Self { catalog, xid: None }
    }

    /// Xid of the explicit transaction, if one is open.
    pub fn current_xid(&self) -> Option<Xid> {
        self.xid
    }

    /// Parses and runs one statement, returning its textual result.
    pub fn execute(&mut self, sql: &str) -> Result<String> {
        let result = parse(sql).and_then(|stmt| self.dispatch(stmt));
        if let Err(err) = &result {
            if let Some(xid) = self.xid.take() {
                warn!(xid, error = %err, "executor.abort_on_error");
                self.abort_quietly(xid);
            }
        }
        result
    }

    fn dispatch(&mut self, stmt: Statement) -> Result<String> {
        debug!(?stmt, xid = ?self.xid, "executor.dispatch");
        match stmt {
            Statement::Begin(level) => {
                if self.xid.is_some() {
                    return Err(KeelError::NestedTransaction);
                }
                self.xid = Some(self.catalog.begin(level)?);
                Ok("begin".to_string())
            }
            Statement::Commit => {
                let xid = self.xid.ok_or(KeelError::NoTransaction)?;
                self.catalog.commit(xid)?;
                self.xid = None;
                Ok("commit".to_string())
            }
            Statement::Abort => {
                let xid = self.xid.take().ok_or(KeelError::NoTransaction)?;
                self.catalog.abort(xid)?;
                Ok("abort".to_string())
            }
            Statement::Create(create) => {
                self.catalog.create_table(&create)?;
                Ok(format!("create {}", create.table))
            }
            Statement::Drop(table) => Err(KeelError::InvalidCommand(format!(
                "drop table {table}: dropping tables is not supported"
            ))),
            Statement::Show => Ok(self.catalog.show()),
            Statement::Select(select) => self.in_transaction(|catalog, xid| catalog.select(xid, &select)),
            Statement::Insert(insert) => self.in_transaction(|catalog, xid| {
                catalog.insert(xid, &insert)?;
                Ok("insert".to_string())
            }),
            Statement::Delete(delete) => self.in_transaction(|catalog, xid| {
                Ok(format!("delete {}", catalog.delete(xid, &delete)?))
            }),
            Statement::Update(update) => self.in_transaction(|catalog, xid| {
                Ok(format!("update {}", catalog.update(xid, &update)?))
            }),
        }
    }

    /// Runs `f` in the open transaction, or in an implicit one that is
    /// committed on success and aborted on failure.
    fn in_transaction(&self, f: impl FnOnce(&TableManager, Xid) -> Result<String>) -> Result<String> {
        if let Some(xid) = self.xid {
            return f(&self.catalog, xid);
        }
        let xid = self.catalog.begin(IsolationLevel::ReadCommitted)?;
        let result = f(&self.catalog, xid).and_then(|out| {
            self.catalog.commit(xid)?;
            Ok(out)
        });
        if result.is_err() {
            self.abort_quietly(xid);
        }
        result
    }

    fn abort_quietly(&self, xid: Xid) {
        if let Err(err) = self.catalog.abort(xid) {
            warn!(xid, error = %err, "executor.abort_failed");
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if let Some(xid) = self.xid.take() {
            debug!(xid, "executor.drop aborts open transaction");
            self.abort_quietly(xid);
        }
    }
}
