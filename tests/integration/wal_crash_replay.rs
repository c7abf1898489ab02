//! Crash replay through the log.
//!
//! A "crash" is dropping the engine without closing it: page 1 keeps the
//! open stamp, so the next open replays the log before anything else.

#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use keeldb::primitives::wal::Wal;
use keeldb::storage::dm::DataManager;
use keeldb::storage::mvcc::{IsolationLevel, VersionManager};
use keeldb::storage::{db_file, EngineOptions, TransactionManager, TxnStatus, LOG_SUFFIX, XID_SUFFIX};
use keeldb::types::Result;
use tempfile::tempdir;

struct Engine {
    tm: Arc<TransactionManager>,
    dm: Arc<DataManager>,
    vm: VersionManager,
}

impl Engine {
    fn create(base: &Path) -> Result<Self> {
        let tm = Arc::new(TransactionManager::create(db_file(base, XID_SUFFIX))?);
        let dm = Arc::new(DataManager::create(base, &EngineOptions::default())?);
        Ok(Self::wire(tm, dm))
    }

    fn open(base: &Path) -> Result<Self> {
        let tm = Arc::new(TransactionManager::open(db_file(base, XID_SUFFIX))?);
        let dm = Arc::new(DataManager::open(base, &EngineOptions::default(), &tm)?);
        Ok(Self::wire(tm, dm))
    }

    fn wire(tm: Arc<TransactionManager>, dm: Arc<DataManager>) -> Self {
        let vm = VersionManager::new(Arc::clone(&tm), Arc::clone(&dm));
        Self { tm, dm, vm }
    }

    fn close(self) -> Result<()> {
        self.vm.close()?;
        self.dm.close()?;
        self.tm.close()
    }
}

#[test]
fn torn_log_tail_is_dropped_on_open() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("torn.log");
    {
        let wal = Wal::create(&path)?;
        for payload in [&b"first"[..], b"second", b"third"] {
            wal.append(payload)?;
        }
        wal.close()?;
    }
    {
        let mut file = OpenOptions::new().append(true).open(&path)?;
        // a record header promising more bytes than follow it
        file.write_all(&[0, 0, 0, 64, 1, 2, 3, 4, 9, 9])?;
    }

    let wal = Wal::open(&path)?;
    assert_eq!(wal.stats().bytes_truncated, 10);
    let mut replayed = Vec::new();
    while let Some(payload) = wal.next()? {
        replayed.push(payload);
    }
    assert_eq!(replayed, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);

    wal.append(b"fourth")?;
    wal.close()?;
    drop(wal);
    let wal = Wal::open(&path)?;
    assert_eq!(wal.stats().bytes_truncated, 0);
    let mut count = 0;
    while wal.next()?.is_some() {
        count += 1;
    }
    assert_eq!(count, 4);
    Ok(())
}

#[test]
fn crash_keeps_committed_and_drops_the_rest() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let base = dir.path().join("crash");

    let (kept, rolled_back, in_flight, deleted, in_flight_xid) = {
        let engine = Engine::create(&base)?;
        let vm = &engine.vm;

        let setup = vm.begin(IsolationLevel::ReadCommitted)?;
        let deleted = vm.insert(setup, b"doomed")?;
        vm.commit(setup)?;

        let committed = vm.begin(IsolationLevel::ReadCommitted)?;
        let kept = vm.insert(committed, b"kept")?;
        assert!(vm.delete(committed, deleted)?);
        vm.commit(committed)?;

        let aborted = vm.begin(IsolationLevel::ReadCommitted)?;
        let rolled_back = vm.insert(aborted, b"rolled back")?;
        vm.abort(aborted)?;

        let open = vm.begin(IsolationLevel::ReadCommitted)?;
        let in_flight = vm.insert(open, b"in flight")?;
        assert!(vm.delete(open, kept)?);

        // no close: page 1 still carries the open stamp
        (kept, rolled_back, in_flight, deleted, open)
    };

    let engine = Engine::open(&base)?;
    let stats = engine.dm.last_recovery().expect("recovery ran");
    assert_eq!(stats.aborted, 1);
    assert!(stats.redone > 0);
    assert!(stats.undone > 0);
    assert_eq!(engine.tm.status(in_flight_xid)?, TxnStatus::Aborted);

    let vm = &engine.vm;
    let reader = vm.begin(IsolationLevel::RepeatableRead)?;
    assert_eq!(vm.read(reader, kept)?, Some(b"kept".to_vec()));
    assert_eq!(vm.read(reader, deleted)?, None);
    assert_eq!(vm.read(reader, rolled_back)?, None);
    assert_eq!(vm.read(reader, in_flight)?, None);
    vm.commit(reader)?;
    engine.close()?;

    let engine = Engine::open(&base)?;
    assert!(engine.dm.last_recovery().is_none());
    assert!(db_file(&base, LOG_SUFFIX).exists());
    engine.close()
}

#[test]
fn repeated_crashes_converge() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let base = dir.path().join("again");
    let mut uids = Vec::new();
    {
        let engine = Engine::create(&base)?;
        let xid = engine.vm.begin(IsolationLevel::ReadCommitted)?;
        for i in 0..200u32 {
            uids.push(engine.vm.insert(xid, &i.to_be_bytes())?);
        }
        engine.vm.commit(xid)?;
    }
    for _ in 0..3 {
        let engine = Engine::open(&base)?;
        assert!(engine.dm.last_recovery().is_some());
        let xid = engine.vm.begin(IsolationLevel::ReadCommitted)?;
        for (i, uid) in uids.iter().enumerate() {
            let expected = (i as u32).to_be_bytes().to_vec();
            assert_eq!(engine.vm.read(xid, *uid)?, Some(expected));
        }
        engine.vm.commit(xid)?;
    }
    Engine::open(&base)?.close()
}
