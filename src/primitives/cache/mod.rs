#![forbid(unsafe_code)]

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{error, trace};

use crate::types::{KeelError, Result};

/// Source of cached resources: how to load one and how to write it back
/// once nobody references it any more.
pub trait Loader: Send + Sync + 'static {
    /// Cache key.
    type Key: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    /// Resident resource.
    type Value: Send + Sync + 'static;

    /// Materializes the resource for `key`.
    fn load(&self, key: Self::Key) -> Result<Self::Value>;

    /// Called exactly once when the resource leaves the cache.
    fn writeback(&self, key: Self::Key, value: &Self::Value) -> Result<()>;
}

struct Slot<V> {
    value: Arc<V>,
    refs: usize,
}

struct CacheState<K, V> {
    resident: HashMap<K, Slot<V>>,
    /// Keys currently being loaded or written back. Lookups wait on these.
    busy: HashSet<K>,
    /// Resident plus in-flight loads, checked against the capacity.
    count: usize,
}

/// Reference-counted cache.
///
/// A key is loaded at most once while any [`Handle`] for it is alive. When
/// the last handle is dropped the value is written back and evicted. Callers
/// that ask for a key a peer is loading block on a condition variable until
/// the load finishes.
pub struct RefCache<L: Loader> {
    loader: L,
    capacity: usize,
    state: Mutex<CacheState<L::Key, L::Value>>,
    ready: Condvar,
}

impl<L: Loader> RefCache<L> {
    /// Creates a cache. A `capacity` of zero means unbounded.
    pub fn new(loader: L, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            loader,
            capacity,
            state: Mutex::new(CacheState {
                resident: HashMap::new(),
                busy: HashSet::new(),
                count: 0,
            }),
            ready: Condvar::new(),
        })
    }

    /// The loader backing this cache.
    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Number of resident entries.
    pub fn resident(&self) -> usize {
        self.state.lock().resident.len()
    }

    /// Returns a handle to the value for `key`, loading it if needed.
    pub fn get(self: &Arc<Self>, key: L::Key) -> Result<Handle<L>> {
        let mut state = self.state.lock();
        loop {
            if state.busy.contains(&key) {
                self.ready.wait(&mut state);
                continue;
            }
            if let Some(slot) = state.resident.get_mut(&key) {
                slot.refs += 1;
                return Ok(self.handle(key, Arc::clone(&slot.value)));
            }
            if self.capacity > 0 && state.count >= self.capacity {
                return Err(KeelError::CacheFull);
            }
            state.count += 1;
            state.busy.insert(key);
            break;
        }
        drop(state);

        trace!(?key, "cache.load");
        let loaded = self.loader.load(key);

        let mut state = self.state.lock();
        state.busy.remove(&key);
        let result = match loaded {
            Ok(value) => {
                let value = Arc::new(value);
                state.resident.insert(
                    key,
                    Slot {
                        value: Arc::clone(&value),
                        refs: 1,
                    },
                );
                Ok(self.handle(key, value))
            }
            Err(err) => {
                state.count -= 1;
                Err(err)
            }
        };
        drop(state);
        self.ready.notify_all();
        result
    }

    fn handle(self: &Arc<Self>, key: L::Key, value: Arc<L::Value>) -> Handle<L> {
        Handle {
            cache: Arc::clone(self),
            key,
            value,
            released: false,
        }
    }

    fn release(&self, key: L::Key) -> Result<()> {
        let mut state = self.state.lock();
        let slot = match state.resident.entry(key) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.refs = slot.refs.saturating_sub(1);
                if slot.refs > 0 {
                    return Ok(());
                }
                occupied.remove()
            }
            // already evicted by close_all
            Entry::Vacant(_) => return Ok(()),
        };
        state.busy.insert(key);
        drop(state);

        trace!(?key, "cache.writeback");
        let result = self.loader.writeback(key, &slot.value);
        drop(slot);

        let mut state = self.state.lock();
        state.busy.remove(&key);
        state.count -= 1;
        drop(state);
        self.ready.notify_all();
        result
    }

    /// Writes back and evicts every resident entry, referenced or not.
    ///
    /// Handles still alive afterwards keep their value; dropping them is a no-op.
    pub fn close_all(&self) -> Result<()> {
        let drained: Vec<(L::Key, Slot<L::Value>)> = {
            let mut state = self.state.lock();
            let drained: Vec<_> = state.resident.drain().collect();
            state.count -= drained.len();
            drained
        };
        let mut first_err = None;
        for (key, slot) in drained {
            if let Err(err) = self.loader.writeback(key, &slot.value) {
                error!(?key, %err, "cache.close_all writeback failed");
                first_err.get_or_insert(err);
            }
        }
        self.ready.notify_all();
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Counted reference to a cached value. Dropping it releases the reference.
pub struct Handle<L: Loader> {
    cache: Arc<RefCache<L>>,
    key: L::Key,
    value: Arc<L::Value>,
    released: bool,
}

impl<L: Loader> Handle<L> {
    /// Key this handle refers to.
    pub fn key(&self) -> L::Key {
        self.key
    }

    /// Releases the reference, surfacing writeback errors that `Drop` can only log.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.cache.release(self.key)
    }
}

impl<L: Loader> Deref for Handle<L> {
    type Target = L::Value;

    fn deref(&self) -> &L::Value {
        &self.value
    }
}

impl<L: Loader> Drop for Handle<L> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.cache.release(self.key) {
            error!(key = ?self.key, %err, "cache.release writeback failed");
        }
    }
}

impl<L: Loader> fmt::Debug for Handle<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        loads: AtomicUsize,
        writebacks: AtomicUsize,
        delay: Option<Duration>,
        fail_key: Option<u32>,
    }

    impl Loader for Arc<Counting> {
        type Key = u32;
        type Value = String;

        fn load(&self, key: u32) -> Result<String> {
            if Some(key) == self.fail_key {
                return Err(KeelError::Invalid("load failure"));
            }
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("value-{key}"))
        }

        fn writeback(&self, _key: u32, _value: &String) -> Result<()> {
            self.writebacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn get_and_release_evicts_at_zero() {
        let counting = Arc::new(Counting::default());
        let cache = RefCache::new(Arc::clone(&counting), 0);

        let a = cache.get(1).unwrap();
        let b = cache.get(1).unwrap();
        assert_eq!(&*a, "value-1");
        assert_eq!(counting.loads.load(Ordering::SeqCst), 1);

        drop(a);
        assert_eq!(counting.writebacks.load(Ordering::SeqCst), 0);
        assert_eq!(cache.resident(), 1);

        b.release().unwrap();
        assert_eq!(counting.writebacks.load(Ordering::SeqCst), 1);
        assert_eq!(cache.resident(), 0);

        let _c = cache.get(1).unwrap();
        assert_eq!(counting.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_gets_load_once() {
        let counting = Arc::new(Counting {
            delay: Some(Duration::from_millis(30)),
            ..Counting::default()
        });
        let cache = RefCache::new(Arc::clone(&counting), 0);
        let barrier = Arc::new(Barrier::new(8));
        let holders: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get(42).unwrap()
                })
            })
            .collect();
        let handles: Vec<_> = holders.into_iter().map(|t| t.join().unwrap()).collect();
        assert_eq!(counting.loads.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| &**h == "value-42"));

        drop(handles);
        assert_eq!(counting.writebacks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bounded_cache_reports_full() {
        let counting = Arc::new(Counting::default());
        let cache = RefCache::new(Arc::clone(&counting), 2);
        let _a = cache.get(1).unwrap();
        let b = cache.get(2).unwrap();
        assert!(matches!(cache.get(3), Err(KeelError::CacheFull)));
        drop(b);
        let _c = cache.get(3).unwrap();
    }

    #[test]
    fn failed_load_frees_the_slot() {
        let counting = Arc::new(Counting {
            fail_key: Some(9),
            ..Counting::default()
        });
        let cache = RefCache::new(Arc::clone(&counting), 1);
        assert!(cache.get(9).is_err());
        let _ok = cache.get(1).unwrap();
        assert_eq!(cache.resident(), 1);
    }

    #[test]
    fn close_all_writes_back_everything_once() {
        let counting = Arc::new(Counting::default());
        let cache = RefCache::new(Arc::clone(&counting), 0);
        let a = cache.get(1).unwrap();
        let b = cache.get(2).unwrap();
        cache.close_all().unwrap();
        assert_eq!(counting.writebacks.load(Ordering::SeqCst), 2);
        drop(a);
        drop(b);
        assert_eq!(counting.writebacks.load(Ordering::SeqCst), 2);
        assert_eq!(cache.resident(), 0);
    }
}
