//! Database facade: wires the transaction file, data manager, version
//! manager and catalog for one base path, under an exclusive process lock.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::catalog::{TableManager, BOOTER_SUFFIX};
use crate::primitives::concurrency::ProcessLock;
use crate::server::Executor;
use crate::storage::dm::{DataManager, RecoveryStats};
use crate::storage::mvcc::VersionManager;
use crate::storage::{db_file, EngineOptions, TransactionManager, DB_SUFFIX, LOG_SUFFIX, XID_SUFFIX};
use crate::types::{KeelError, Result};

/// Suffix of the process lock file.
pub const LOCK_SUFFIX: &str = ".lock";

const DATA_SUFFIXES: [&str; 4] = [XID_SUFFIX, DB_SUFFIX, LOG_SUFFIX, BOOTER_SUFFIX];

/// An open database.
///
/// Dropping it without [`Database::close`] leaves the files as after a
/// crash: the next open runs recovery.
pub struct Database {
    base: PathBuf,
    tm: Arc<TransactionManager>,
    dm: Arc<DataManager>,
    catalog: Arc<TableManager>,
    _lock: ProcessLock,
}

impl Database {
    /// Creates a new database at `path`; fails if any of its files exist.
    pub fn create(path: impl AsRef<Path>, options: &EngineOptions) -> Result<Self> {
        let base = path.as_ref().to_path_buf();
        if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let lock = ProcessLock::acquire(db_file(&base, LOCK_SUFFIX))?;
        if let Some(existing) = data_files(&base).into_iter().find(|file| file.exists()) {
            return Err(KeelError::FileExists(existing));
        }
        let tm = Arc::new(TransactionManager::create(db_file(&base, XID_SUFFIX))?);
        let dm = Arc::new(DataManager::create(&base, options)?);
        let vm = Arc::new(VersionManager::new(Arc::clone(&tm), Arc::clone(&dm)));
        let catalog = Arc::new(TableManager::create(&base, vm)?);
        info!(path = %base.display(), "db.create");
        Ok(Self {
            base,
            tm,
            dm,
            catalog,
            _lock: lock,
        })
    }

    /// Opens the database at `path`, recovering it if it was not closed.
    pub fn open(path: impl AsRef<Path>, options: &EngineOptions) -> Result<Self> {
        let base = path.as_ref().to_path_buf();
        if let Some(missing) = data_files(&base).into_iter().find(|file| !file.exists()) {
            return Err(KeelError::FileNotFound(missing));
        }
        let lock = ProcessLock::acquire(db_file(&base, LOCK_SUFFIX))?;
        let tm = Arc::new(TransactionManager::open(db_file(&base, XID_SUFFIX))?);
        let dm = Arc::new(DataManager::open(&base, options, &tm)?);
        if let Some(stats) = dm.last_recovery() {
            info!(
                redone = stats.redone,
                undone = stats.undone,
                aborted = stats.aborted,
                "db.recovered"
            );
        }
        let vm = Arc::new(VersionManager::new(Arc::clone(&tm), Arc::clone(&dm)));
        let catalog = Arc::new(TableManager::open(&base, vm)?);
        info!(path = %base.display(), "db.open");
        Ok(Self {
            base,
            tm,
            dm,
            catalog,
            _lock: lock,
        })
    }

    /// Deletes every file of the database at `path`.
    ///
    /// Fails with [`KeelError::AlreadyLocked`] while it is open anywhere.
    pub fn remove(path: impl AsRef<Path>) -> Result<()> {
        let base = path.as_ref();
        let lock_path = db_file(base, LOCK_SUFFIX);
        let lock = ProcessLock::acquire(&lock_path)?;
        for file in data_files(base) {
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        drop(lock);
        fs::remove_file(&lock_path)?;
        info!(path = %base.display(), "db.remove");
        Ok(())
    }

    /// Base path of the database files.
    pub fn path(&self) -> &Path {
        &self.base
    }

    /// The table catalog.
    pub fn catalog(&self) -> &Arc<TableManager> {
        &self.catalog
    }

    /// A fresh executor for one client.
    pub fn executor(&self) -> Executor {
        Executor::new(Arc::clone(&self.catalog))
    }

    /// Recovery report of this open, if recovery ran.
    pub fn last_recovery(&self) -> Option<RecoveryStats> {
        self.dm.last_recovery()
    }

    /// Aborts every open transaction, waits for running statements, then
    /// flushes and closes the data manager and the transaction file.
    ///
    /// Executors still holding the catalog get [`KeelError::Closed`] from
    /// then on.
    pub fn close(self) -> Result<()> {
        self.catalog.close()?;
        drop(self.catalog);
        self.dm.close()?;
        self.tm.close()?;
        info!(path = %self.base.display(), "db.close");
        Ok(())
    }
}

fn data_files(base: &Path) -> Vec<PathBuf> {
    DATA_SUFFIXES
        .iter()
        .map(|suffix| db_file(base, suffix))
        .collect()
}
