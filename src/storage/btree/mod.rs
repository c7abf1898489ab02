#![forbid(unsafe_code)]

//! Persistent B+Tree whose nodes are ordinary data manager records.
//!
//! The current root is named by a small boot record holding the root's uid,
//! so a root split is a single logged rewrite of that record. Every node
//! edit goes through `before`/`after` under the super-transaction and is
//! logged on its own. Readers never lock paths: a key that moved right
//! because of a concurrent split is found by following sibling links.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::storage::dm::{DataManager, Record};
use crate::types::{KeelError, Result, Uid, SUPER_XID};

mod node;

use node::{Insert, Node, Split, Step};


/// Handle to one B+Tree, identified by its boot record.
pub struct BPlusTree {
    dm: Arc<DataManager>,
    boot_uid: Uid,
    boot: Record,
    root_lock: Mutex<()>,
}

impl BPlusTree {
    /// Creates an empty tree and returns the uid of its boot record.
    pub fn create(dm: &DataManager) -> Result<Uid> {
        let root = dm.insert(SUPER_XID, &node::empty_root_raw())?;
        let boot = dm.insert(SUPER_XID, &root.0.to_be_bytes())?;
        debug!(%boot, %root, "btree.create");
        Ok(boot)
    }

    /// Opens the tree whose boot record is `boot_uid`.
    pub fn load(boot_uid: Uid, dm: Arc<DataManager>) -> Result<Self> {
        let boot = dm
            .read(boot_uid)?
            .ok_or(KeelError::Corruption("btree boot record missing"))?;
        if boot.len() != 8 {
            return Err(KeelError::Corruption("btree boot record has wrong size"));
        }
        Ok(Self {
            dm,
            boot_uid,
            boot,
            root_lock: Mutex::new(()),
        })
    }

    /// Uid of the boot record.
    pub fn boot_uid(&self) -> Uid {
        self.boot_uid
    }

    fn root_uid(&self) -> Uid {
        let _root = self.root_lock.lock();
        self.boot.with_data(|raw| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(raw);
            Uid(u64::from_be_bytes(buf))
        })
    }

    fn update_root(&self, left: Uid, split: Split) -> Result<()> {
        let _root = self.root_lock.lock();
        let raw = node::new_root_raw(left, split.son, split.key);
        let new_root = self.dm.insert(SUPER_XID, &raw)?;
        let mut writer = self.boot.before();
        writer.write(|data| data.copy_from_slice(&new_root.0.to_be_bytes()));
        writer.after(SUPER_XID)?;
        debug!(boot = %self.boot_uid, %new_root, "btree.new_root");
        Ok(())
    }

    /// Uids stored under exactly `key`.
    pub fn search(&self, key: i64) -> Result<Vec<Uid>> {
        self.search_range(key, key)
    }

    /// Uids stored under keys in `lo..=hi`, in key order.
    pub fn search_range(&self, lo: i64, hi: i64) -> Result<Vec<Uid>> {
        let mut uids = Vec::new();
        if lo > hi {
            return Ok(uids);
        }
        // Descend just below `lo` so that duplicates of `lo` left of a split
        // boundary are reached; the leaf scan skips smaller keys.
        let mut leaf = self.search_leaf(self.root_uid(), lo.saturating_sub(1))?;
        loop {
            let found = Node::load(&self.dm, leaf)?.leaf_search_range(lo, hi);
            uids.extend(found.uids);
            match found.sibling {
                Some(next) => leaf = next,
                None => return Ok(uids),
            }
        }
    }

    /// Adds `(key, uid)`. Duplicate keys are kept side by side.
    pub fn insert(&self, key: i64, uid: Uid) -> Result<()> {
        let root = self.root_uid();
        if let Some(split) = self.insert_at(root, uid, key)? {
            self.update_root(root, split)?;
        }
        Ok(())
    }

    fn search_leaf(&self, mut node_uid: Uid, key: i64) -> Result<Uid> {
        loop {
            let node = Node::load(&self.dm, node_uid)?;
            if node.is_leaf() {
                return Ok(node_uid);
            }
            node_uid = self.search_next(node, key)?;
        }
    }

    /// Child of an internal node covering `key`, following siblings as needed.
    fn search_next(&self, mut node: Node, key: i64) -> Result<Uid> {
        loop {
            match node.search_next(key)? {
                Step::Child(child) => return Ok(child),
                Step::Sibling(next) => node = Node::load(&self.dm, next)?,
            }
        }
    }

    fn insert_at(&self, node_uid: Uid, uid: Uid, key: i64) -> Result<Option<Split>> {
        let node = Node::load(&self.dm, node_uid)?;
        if node.is_leaf() {
            drop(node);
            return self.insert_and_split(node_uid, uid, key);
        }
        let child = self.search_next(node, key)?;
        match self.insert_at(child, uid, key)? {
            Some(split) => self.insert_and_split(node_uid, split.son, split.key),
            None => Ok(None),
        }
    }

    fn insert_and_split(&self, mut node_uid: Uid, uid: Uid, key: i64) -> Result<Option<Split>> {
        loop {
            let node = Node::load(&self.dm, node_uid)?;
            match node.insert_and_split(&self.dm, uid, key)? {
                Insert::Moved(next) => node_uid = next,
                Insert::Done(split) => return Ok(split),
            }
        }
    }
}
