//! Isolation anomalies under the two supported levels.
//!
//! Read committed prevents dirty reads only. Repeatable read also prevents
//! non-repeatable reads and phantoms, and refuses to delete a version that a
//! transaction it cannot see already replaced (lost update).

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use keeldb::storage::dm::DataManager;
use keeldb::storage::mvcc::{IsolationLevel, VersionManager};
use keeldb::storage::{db_file, EngineOptions, TransactionManager, XID_SUFFIX};
use keeldb::types::{KeelError, Result, Uid};
use tempfile::tempdir;

use IsolationLevel::{ReadCommitted, RepeatableRead};

fn setup(base: &Path) -> Result<Arc<VersionManager>> {
    let tm = Arc::new(TransactionManager::create(db_file(base, XID_SUFFIX))?);
    let dm = Arc::new(DataManager::create(base, &EngineOptions::default())?);
    Ok(Arc::new(VersionManager::new(tm, dm)))
}

fn seed(vm: &VersionManager, data: &[u8]) -> Result<Uid> {
    let xid = vm.begin(ReadCommitted)?;
    let uid = vm.insert(xid, data)?;
    vm.commit(xid)?;
    Ok(uid)
}

#[test]
fn dirty_read_is_prevented_at_both_levels() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let vm = setup(&dir.path().join("dirty"))?;

    let writer = vm.begin(ReadCommitted)?;
    let uid = vm.insert(writer, b"uncommitted")?;
    for level in [ReadCommitted, RepeatableRead] {
        let reader = vm.begin(level)?;
        assert_eq!(vm.read(reader, uid)?, None, "{level:?} saw a dirty row");
        vm.commit(reader)?;
    }
    assert_eq!(vm.read(writer, uid)?, Some(b"uncommitted".to_vec()));
    vm.commit(writer)?;
    Ok(())
}

#[test]
fn non_repeatable_read_depends_on_level() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let vm = setup(&dir.path().join("nrr"))?;
    let uid = seed(&vm, b"row")?;

    let rc = vm.begin(ReadCommitted)?;
    let rr = vm.begin(RepeatableRead)?;
    assert!(vm.read(rc, uid)?.is_some());
    assert!(vm.read(rr, uid)?.is_some());

    let deleter = vm.begin(ReadCommitted)?;
    assert!(vm.delete(deleter, uid)?);
    // not yet committed: nobody else notices
    assert!(vm.read(rc, uid)?.is_some());
    assert!(vm.read(rr, uid)?.is_some());
    vm.commit(deleter)?;

    assert_eq!(vm.read(rc, uid)?, None);
    assert_eq!(vm.read(rr, uid)?, Some(b"row".to_vec()));
    vm.commit(rc)?;
    vm.commit(rr)?;
    Ok(())
}

#[test]
fn phantoms_stay_out_of_repeatable_read() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let vm = setup(&dir.path().join("phantom"))?;

    let rr = vm.begin(RepeatableRead)?;
    let concurrent = vm.begin(ReadCommitted)?;
    let early = vm.insert(concurrent, b"early")?;
    vm.commit(concurrent)?;
    let later = seed(&vm, b"later")?;

    assert_eq!(vm.read(rr, early)?, None);
    assert_eq!(vm.read(rr, later)?, None);
    vm.commit(rr)?;

    let fresh = vm.begin(RepeatableRead)?;
    assert!(vm.read(fresh, early)?.is_some());
    assert!(vm.read(fresh, later)?.is_some());
    vm.commit(fresh)?;
    Ok(())
}

#[test]
fn snapshot_excludes_transactions_active_at_begin() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let vm = setup(&dir.path().join("snapshot"))?;

    let older = vm.begin(ReadCommitted)?;
    let uid = vm.insert(older, b"from older")?;
    let rr = vm.begin(RepeatableRead)?;
    vm.commit(older)?;

    // committed, and older than rr, but running when rr began
    assert_eq!(vm.read(rr, uid)?, None);
    vm.abort(rr)?;
    Ok(())
}

#[test]
fn lost_update_is_refused_under_repeatable_read() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let vm = setup(&dir.path().join("lost"))?;
    let uid = seed(&vm, b"balance=10")?;

    let rr = vm.begin(RepeatableRead)?;
    let rc = vm.begin(ReadCommitted)?;
    assert!(vm.read(rr, uid)?.is_some());

    let other = vm.begin(ReadCommitted)?;
    assert!(vm.delete(other, uid)?);
    vm.insert(other, b"balance=20")?;
    vm.commit(other)?;

    // read committed simply no longer sees the old version
    assert!(!vm.delete(rc, uid)?);
    vm.commit(rc)?;

    assert!(matches!(vm.delete(rr, uid), Err(KeelError::ConcurrentUpdate)));
    assert!(matches!(vm.read(rr, uid), Err(KeelError::ConcurrentUpdate)));
    assert!(matches!(vm.commit(rr), Err(KeelError::ConcurrentUpdate)));
    vm.abort(rr)?;
    assert_eq!(vm.active_count(), 0);
    Ok(())
}

#[test]
fn blocked_writer_sees_the_outcome_of_the_holder() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let vm = setup(&dir.path().join("blocked"))?;
    let committed_row = seed(&vm, b"a")?;
    let aborted_row = seed(&vm, b"b")?;

    for (uid, commit_holder) in [(committed_row, true), (aborted_row, false)] {
        let holder = vm.begin(ReadCommitted)?;
        assert!(vm.delete(holder, uid)?);

        let waiter = vm.begin(ReadCommitted)?;
        let blocked = {
            let vm = Arc::clone(&vm);
            thread::spawn(move || vm.delete(waiter, uid))
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!blocked.is_finished());

        if commit_holder {
            vm.commit(holder)?;
        } else {
            vm.abort(holder)?;
        }
        let deleted = blocked.join().expect("waiter thread")?;
        assert_eq!(deleted, !commit_holder);
        vm.commit(waiter)?;
    }

    let reader = vm.begin(ReadCommitted)?;
    assert_eq!(vm.read(reader, committed_row)?, None);
    assert_eq!(vm.read(reader, aborted_row)?, None);
    vm.commit(reader)?;
    Ok(())
}
