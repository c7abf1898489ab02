//! Exclusive record locks with deadlock detection at request time.
//!
//! The wait-for graph is kept as four maps: which uids each transaction
//! owns, who owns each uid, the FIFO queue of waiters per uid, and the single
//! uid each blocked transaction is waiting for. A request that would close a
//! cycle fails immediately; nothing ever blocks on a cyclic graph.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::types::{KeelError, Result, Uid, Xid};

/// Blocks a transaction until the lock it queued for is handed to it.
#[derive(Clone)]
pub struct Waiter {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Waiter {
    fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Blocks until the lock is granted.
    pub fn wait(&self) {
        let (granted, cv) = &*self.inner;
        let mut granted = granted.lock();
        while !*granted {
            cv.wait(&mut granted);
        }
    }

    /// Whether the lock has been granted already.
    pub fn is_granted(&self) -> bool {
        *self.inner.0.lock()
    }

    fn grant(&self) {
        let (granted, cv) = &*self.inner;
        *granted.lock() = true;
        cv.notify_all();
    }
}

#[derive(Default)]
struct Graph {
    held: HashMap<Xid, Vec<Uid>>,
    owner: HashMap<Uid, Xid>,
    queue: HashMap<Uid, VecDeque<Xid>>,
    waiting_for: HashMap<Xid, Uid>,
    waiters: HashMap<Xid, Waiter>,
}

impl Graph {
    fn has_deadlock(&self) -> bool {
        let mut stamps: HashMap<Xid, u32> = HashMap::new();
        let mut stamp = 0;
        for &xid in self.held.keys() {
            if stamps.contains_key(&xid) {
                continue;
            }
            stamp += 1;
            if self.reaches_cycle(xid, stamp, &mut stamps) {
                return true;
            }
        }
        false
    }

    /// Follows wait edges from `xid`. Meeting the current stamp again is a
    /// cycle; meeting an older stamp joins a path already proven acyclic.
    fn reaches_cycle(&self, mut xid: Xid, stamp: u32, stamps: &mut HashMap<Xid, u32>) -> bool {
        loop {
            match stamps.get(&xid) {
                Some(&seen) if seen == stamp => return true,
                Some(_) => return false,
                None => {}
            }
            stamps.insert(xid, stamp);
            let Some(uid) = self.waiting_for.get(&xid) else {
                return false;
            };
            let Some(&holder) = self.owner.get(uid) else {
                return false;
            };
            xid = holder;
        }
    }

    fn dequeue(&mut self, uid: Uid, xid: Xid) {
        if let Some(queue) = self.queue.get_mut(&uid) {
            queue.retain(|&queued| queued != xid);
            if queue.is_empty() {
                self.queue.remove(&uid);
            }
        }
    }

    /// Hands `uid` to the first queued transaction that is still waiting.
    fn hand_over(&mut self, uid: Uid) {
        self.owner.remove(&uid);
        let Some(queue) = self.queue.get_mut(&uid) else {
            return;
        };
        while let Some(next) = queue.pop_front() {
            // stale entries belong to transactions that gave up waiting
            let Some(waiter) = self.waiters.remove(&next) else {
                continue;
            };
            self.owner.insert(uid, next);
            self.waiting_for.remove(&next);
            self.held.entry(next).or_default().push(uid);
            waiter.grant();
            break;
        }
        if queue.is_empty() {
            self.queue.remove(&uid);
        }
    }
}

/// Per-record exclusive locks held until commit or abort.
#[derive(Default)]
pub struct LockTable {
    graph: Mutex<Graph>,
}

impl LockTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests `uid` for `xid`.
    ///
    /// Returns `None` when the lock is held now, or a [`Waiter`] to block on
    /// when `xid` was queued behind the current owner. Fails with
    /// [`KeelError::Deadlock`] if waiting would close a cycle; in that case
    /// `xid` is not left in any queue.
    pub fn add(&self, xid: Xid, uid: Uid) -> Result<Option<Waiter>> {
        let mut graph = self.graph.lock();
        if graph
            .held
            .get(&xid)
            .is_some_and(|uids| uids.contains(&uid))
        {
            return Ok(None);
        }
        if !graph.owner.contains_key(&uid) {
            graph.owner.insert(uid, xid);
            graph.held.entry(xid).or_default().push(uid);
            return Ok(None);
        }
        graph.waiting_for.insert(xid, uid);
        graph.queue.entry(uid).or_default().push_back(xid);
        if graph.has_deadlock() {
            graph.waiting_for.remove(&xid);
            graph.dequeue(uid, xid);
            warn!(xid, %uid, "lock_table.deadlock");
            return Err(KeelError::Deadlock);
        }
        let waiter = Waiter::new();
        graph.waiters.insert(xid, waiter.clone());
        debug!(xid, %uid, "lock_table.wait");
        Ok(Some(waiter))
    }

    /// Releases everything `xid` owns and forgets its wait state.
    ///
    /// A thread still blocked on `xid`'s [`Waiter`] is woken without being
    /// given the lock; it must check its transaction before going on.
    pub fn remove(&self, xid: Xid) {
        let mut graph = self.graph.lock();
        if let Some(uid) = graph.waiting_for.remove(&xid) {
            graph.dequeue(uid, xid);
        }
        if let Some(waiter) = graph.waiters.remove(&xid) {
            waiter.grant();
        }
        for uid in graph.held.remove(&xid).unwrap_or_default() {
            graph.hand_over(uid);
        }
    }

    /// Current owner of `uid`, if any.
    pub fn owner(&self, uid: Uid) -> Option<Xid> {
        self.graph.lock().owner.get(&uid).copied()
    }
}
