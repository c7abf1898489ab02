//! Concurrent writers through the version manager and the lock table.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use keeldb::storage::btree::BPlusTree;
use keeldb::storage::dm::DataManager;
use keeldb::storage::mvcc::{IsolationLevel, VersionManager};
use keeldb::storage::{db_file, EngineOptions, TransactionManager, XID_SUFFIX};
use keeldb::types::{KeelError, Result, Uid};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

fn setup(base: &Path) -> Result<Arc<VersionManager>> {
    let tm = Arc::new(TransactionManager::create(db_file(base, XID_SUFFIX))?);
    let dm = Arc::new(DataManager::create(base, &EngineOptions::default())?);
    Ok(Arc::new(VersionManager::new(tm, dm)))
}

#[test]
fn crossed_deletes_deadlock_and_the_survivor_finishes() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let vm = setup(&dir.path().join("deadlock"))?;
    let seed = vm.begin(IsolationLevel::ReadCommitted)?;
    let left = vm.insert(seed, b"left")?;
    let right = vm.insert(seed, b"right")?;
    vm.commit(seed)?;

    let first = vm.begin(IsolationLevel::ReadCommitted)?;
    let second = vm.begin(IsolationLevel::ReadCommitted)?;
    assert!(vm.delete(first, left)?);
    assert!(vm.delete(second, right)?);

    let blocked = {
        let vm = Arc::clone(&vm);
        thread::spawn(move || vm.delete(first, right))
    };
    thread::sleep(Duration::from_millis(30));

    // closing the cycle is refused, and second is rolled back on the spot
    assert!(matches!(vm.delete(second, left), Err(KeelError::Deadlock)));
    assert!(blocked.join().expect("blocked thread")?);
    assert!(matches!(vm.insert(second, b"late"), Err(KeelError::Deadlock)));
    vm.abort(second)?;
    vm.commit(first)?;

    let reader = vm.begin(IsolationLevel::ReadCommitted)?;
    assert_eq!(vm.read(reader, left)?, None);
    assert_eq!(vm.read(reader, right)?, None);
    vm.commit(reader)?;
    assert_eq!(vm.active_count(), 0);
    Ok(())
}

#[test]
fn contended_rows_are_deleted_exactly_once() -> Result<()> {
    const THREADS: usize = 6;
    const ROWS: usize = 40;

    let dir = tempdir().expect("tmpdir");
    let vm = setup(&dir.path().join("contended"))?;
    let seed = vm.begin(IsolationLevel::ReadCommitted)?;
    let rows: Vec<Uid> = (0..ROWS)
        .map(|i| vm.insert(seed, format!("row-{i}").as_bytes()))
        .collect::<Result<_>>()?;
    vm.commit(seed)?;
    let rows = Arc::new(rows);

    let deleted = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let vm = Arc::clone(&vm);
            let rows = Arc::clone(&rows);
            let deleted = Arc::clone(&deleted);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<()> {
                let mut rng = StdRng::seed_from_u64(t as u64);
                barrier.wait();
                for _ in 0..ROWS {
                    let uid = rows[rng.gen_range(0..ROWS)];
                    let xid = vm.begin(IsolationLevel::ReadCommitted)?;
                    // one row per transaction: no wait-for cycle can form
                    if vm.delete(xid, uid)? {
                        if rng.gen_bool(0.5) {
                            vm.commit(xid)?;
                            deleted.fetch_add(1, Ordering::SeqCst);
                        } else {
                            vm.abort(xid)?;
                        }
                    } else {
                        vm.commit(xid)?;
                    }
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread")?;
    }

    let reader = vm.begin(IsolationLevel::ReadCommitted)?;
    let mut gone = 0;
    for uid in rows.iter() {
        if vm.read(reader, *uid)?.is_none() {
            gone += 1;
        }
    }
    vm.commit(reader)?;
    assert_eq!(gone, deleted.load(Ordering::SeqCst));
    assert_eq!(vm.active_count(), 0);
    Ok(())
}

#[test]
fn parallel_transactions_see_only_their_own_work() -> Result<()> {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 50;

    let dir = tempdir().expect("tmpdir");
    let vm = setup(&dir.path().join("private"))?;
    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let vm = Arc::clone(&vm);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<Vec<Uid>> {
                let xid = vm.begin(IsolationLevel::RepeatableRead)?;
                barrier.wait();
                let mine: Vec<Uid> = (0..PER_THREAD)
                    .map(|i| vm.insert(xid, format!("{t}:{i}").as_bytes()))
                    .collect::<Result<_>>()?;
                for uid in &mine {
                    assert!(vm.read(xid, *uid)?.is_some());
                }
                barrier.wait();
                vm.commit(xid)?;
                Ok(mine)
            })
        })
        .collect();

    let mut all = HashSet::new();
    for worker in workers {
        for uid in worker.join().expect("worker thread")? {
            assert!(all.insert(uid), "uid {uid} handed out twice");
        }
    }
    assert_eq!(all.len(), THREADS * PER_THREAD);

    let reader = vm.begin(IsolationLevel::RepeatableRead)?;
    for uid in &all {
        assert!(vm.read(reader, *uid)?.is_some());
    }
    vm.commit(reader)?;
    Ok(())
}

#[test]
fn index_and_rows_agree_under_concurrent_writers() -> Result<()> {
    const THREADS: usize = 4;
    const PER_THREAD: i64 = 80;

    let dir = tempdir().expect("tmpdir");
    let vm = setup(&dir.path().join("indexed"))?;
    let dm = Arc::clone(vm.data_manager());
    let boot = BPlusTree::create(&dm)?;
    let tree = Arc::new(BPlusTree::load(boot, Arc::clone(&dm))?);

    let workers: Vec<_> = (0..THREADS as i64)
        .map(|t| {
            let vm = Arc::clone(&vm);
            let tree = Arc::clone(&tree);
            thread::spawn(move || -> Result<()> {
                let xid = vm.begin(IsolationLevel::ReadCommitted)?;
                for i in 0..PER_THREAD {
                    let key = t * PER_THREAD + i;
                    let uid = vm.insert(xid, &key.to_be_bytes())?;
                    tree.insert(key, uid)?;
                }
                if t % 2 == 0 {
                    vm.commit(xid)
                } else {
                    vm.abort(xid)
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread")?;
    }

    let hits = tree.search_range(i64::MIN, i64::MAX)?;
    assert_eq!(hits.len(), THREADS * PER_THREAD as usize);
    let reader = vm.begin(IsolationLevel::ReadCommitted)?;
    let mut visible = 0;
    for uid in hits {
        if let Some(raw) = vm.read(reader, uid)? {
            let key = i64::from_be_bytes(raw.as_slice().try_into().expect("8 bytes"));
            assert_eq!((key / PER_THREAD) % 2, 0);
            visible += 1;
        }
    }
    vm.commit(reader)?;
    assert_eq!(visible, (THREADS / 2) * PER_THREAD as usize);
    Ok(())
}
