//! Node layout: `[isLeaf:1][keyCount:2][sibling:8]` followed by
//! `2 * BALANCE + 2` slots of `[son:8][key:8]`.
//!
//! In an internal node `key[i]` is the exclusive upper bound of `son[i]`,
//! and the rightmost node of a level ends with an `i64::MAX` sentinel.

use crate::storage::dm::{DataManager, Record};
use crate::types::{KeelError, Result, Uid, SUPER_XID};

pub(crate) const BALANCE: usize = 32;

const OF_LEAF: usize = 0;
const OF_KEYS: usize = OF_LEAF + 1;
const OF_SIBLING: usize = OF_KEYS + 2;
const OF_PAIRS: usize = OF_SIBLING + 8;
const PAIR_LEN: usize = 16;

pub(crate) const NODE_SIZE: usize = OF_PAIRS + PAIR_LEN * (2 * BALANCE + 2);

fn pair_at(kth: usize) -> usize {
    OF_PAIRS + kth * PAIR_LEN
}

fn read_u64(raw: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&raw[at..at + 8]);
    u64::from_be_bytes(buf)
}

fn is_leaf(raw: &[u8]) -> bool {
    raw[OF_LEAF] == 1
}

fn set_leaf(raw: &mut [u8], leaf: bool) {
    raw[OF_LEAF] = u8::from(leaf);
}

fn key_count(raw: &[u8]) -> usize {
    usize::from(u16::from_be_bytes([raw[OF_KEYS], raw[OF_KEYS + 1]]))
}

fn set_key_count(raw: &mut [u8], count: usize) {
    raw[OF_KEYS..OF_KEYS + 2].copy_from_slice(&(count as u16).to_be_bytes());
}

fn sibling(raw: &[u8]) -> Uid {
    Uid(read_u64(raw, OF_SIBLING))
}

fn set_sibling(raw: &mut [u8], sibling: Uid) {
    raw[OF_SIBLING..OF_SIBLING + 8].copy_from_slice(&sibling.0.to_be_bytes());
}

fn son(raw: &[u8], kth: usize) -> Uid {
    Uid(read_u64(raw, pair_at(kth)))
}

fn set_son(raw: &mut [u8], kth: usize, son: Uid) {
    let at = pair_at(kth);
    raw[at..at + 8].copy_from_slice(&son.0.to_be_bytes());
}

fn key(raw: &[u8], kth: usize) -> i64 {
    read_u64(raw, pair_at(kth) + 8) as i64
}

fn set_key(raw: &mut [u8], kth: usize, key: i64) {
    let at = pair_at(kth) + 8;
    raw[at..at + 8].copy_from_slice(&key.to_be_bytes());
}

/// Moves slots `kth..count` one slot to the right.
fn shift_right(raw: &mut [u8], kth: usize, count: usize) {
    raw.copy_within(pair_at(kth)..pair_at(count), pair_at(kth + 1));
}

/// Image of an empty leaf, used as the first root.
pub(crate) fn empty_root_raw() -> Vec<u8> {
    let mut raw = vec![0u8; NODE_SIZE];
    set_leaf(&mut raw, true);
    raw
}

/// Image of a new root over two children split at `key`.
pub(crate) fn new_root_raw(left: Uid, right: Uid, key: i64) -> Vec<u8> {
    let mut raw = vec![0u8; NODE_SIZE];
    set_leaf(&mut raw, false);
    set_key_count(&mut raw, 2);
    set_son(&mut raw, 0, left);
    set_key(&mut raw, 0, key);
    set_son(&mut raw, 1, right);
    set_key(&mut raw, 1, i64::MAX);
    raw
}

/// Result of stepping through an internal node.
pub(crate) enum Step {
    /// Descend into this child.
    Child(Uid),
    /// The key lies beyond this node; continue with its sibling.
    Sibling(Uid),
}

/// Keys of one leaf that fall in the requested range.
pub(crate) struct LeafRange {
    pub uids: Vec<Uid>,
    /// Set when the scan ran off the end of the leaf and must continue.
    pub sibling: Option<Uid>,
}

/// Outcome of inserting into a single node.
pub(crate) enum Insert {
    /// The key belongs to the right sibling; retry there.
    Moved(Uid),
    /// Inserted; carries the new right node if the node split.
    Done(Option<Split>),
}

/// Right half produced by a split, to be linked into the parent.
pub(crate) struct Split {
    pub son: Uid,
    pub key: i64,
}

/// A B+Tree node backed by a data manager record.
pub(crate) struct Node {
    record: Record,
}

impl Node {
    pub(crate) fn load(dm: &DataManager, uid: Uid) -> Result<Self> {
        let record = dm
            .read(uid)?
            .ok_or(KeelError::Corruption("btree node missing"))?;
        if record.len() != NODE_SIZE {
            return Err(KeelError::Corruption("btree node has wrong size"));
        }
        Ok(Self { record })
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.record.with_data(is_leaf)
    }

    /// Finds the child whose upper bound exceeds `target`.
    pub(crate) fn search_next(&self, target: i64) -> Result<Step> {
        self.record.with_data(|raw| {
            let count = key_count(raw);
            if let Some(kth) = (0..count).find(|&kth| target < key(raw, kth)) {
                return Ok(Step::Child(son(raw, kth)));
            }
            let next = sibling(raw);
            if !next.is_null() {
                return Ok(Step::Sibling(next));
            }
            // only `i64::MAX` itself gets past the sentinel of the rightmost node
            match count.checked_sub(1) {
                Some(last) => Ok(Step::Child(son(raw, last))),
                None => Err(KeelError::Corruption("empty internal btree node")),
            }
        })
    }

    /// Collects uids of keys in `lo..=hi` from a leaf.
    pub(crate) fn leaf_search_range(&self, lo: i64, hi: i64) -> LeafRange {
        self.record.with_data(|raw| {
            let count = key_count(raw);
            let mut kth = 0;
            while kth < count && key(raw, kth) < lo {
                kth += 1;
            }
            let mut uids = Vec::new();
            while kth < count && key(raw, kth) <= hi {
                uids.push(son(raw, kth));
                kth += 1;
            }
            let next = sibling(raw);
            LeafRange {
                uids,
                sibling: (kth == count && !next.is_null()).then_some(next),
            }
        })
    }

    /// Inserts `(key, uid)` into this node, splitting it once it is full.
    pub(crate) fn insert_and_split(
        &self,
        dm: &DataManager,
        uid: Uid,
        new_key: i64,
    ) -> Result<Insert> {
        let mut writer = self.record.before();
        let placed = writer.write(|raw| insert(raw, uid, new_key));
        if let Err(next) = placed {
            writer.un_before();
            return Ok(Insert::Moved(next));
        }
        let split = if writer.read(key_count) == 2 * BALANCE {
            let right = writer.read(right_half);
            let son = dm.insert(SUPER_XID, &right)?;
            writer.write(|raw| {
                set_key_count(raw, BALANCE);
                set_sibling(raw, son);
            });
            Some(Split {
                son,
                key: key(&right, 0),
            })
        } else {
            None
        };
        writer.after(SUPER_XID)?;
        Ok(Insert::Done(split))
    }
}

/// Places the pair in sorted position. Fails with the sibling uid if the key
/// sorts past the last key and the node has a right sibling.
fn insert(raw: &mut [u8], uid: Uid, new_key: i64) -> std::result::Result<(), Uid> {
    let count = key_count(raw);
    let mut kth = 0;
    while kth < count && key(raw, kth) < new_key {
        kth += 1;
    }
    let next = sibling(raw);
    if kth == count && !next.is_null() {
        return Err(next);
    }
    if is_leaf(raw) {
        shift_right(raw, kth, count);
        set_key(raw, kth, new_key);
        set_son(raw, kth, uid);
    } else {
        // the child at kth now ends at new_key; the new child takes over its old bound
        let old_bound = key(raw, kth);
        set_key(raw, kth, new_key);
        shift_right(raw, kth + 1, count);
        set_key(raw, kth + 1, old_bound);
        set_son(raw, kth + 1, uid);
    }
    set_key_count(raw, count + 1);
    Ok(())
}

/// New node holding slots `BALANCE..2 * BALANCE` and the old sibling link.
fn right_half(raw: &[u8]) -> Vec<u8> {
    let mut right = vec![0u8; NODE_SIZE];
    set_leaf(&mut right, is_leaf(raw));
    set_key_count(&mut right, BALANCE);
    set_sibling(&mut right, sibling(raw));
    right[pair_at(0)..pair_at(BALANCE)]
        .copy_from_slice(&raw[pair_at(BALANCE)..pair_at(2 * BALANCE)]);
    right
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_size_matches_layout() {
        assert_eq!(NODE_SIZE, 11 + 16 * 66);
    }

    #[test]
    fn leaf_insert_keeps_order() {
        let mut raw = empty_root_raw();
        for k in [5i64, 1, 3] {
            insert(&mut raw, Uid(k as u64 * 10), k).unwrap();
        }
        assert_eq!(key_count(&raw), 3);
        let keys: Vec<i64> = (0..3).map(|i| key(&raw, i)).collect();
        assert_eq!(keys, vec![1, 3, 5]);
        assert_eq!(son(&raw, 1), Uid(30));
    }

    #[test]
    fn internal_insert_splits_the_bound() {
        let mut raw = new_root_raw(Uid(100), Uid(200), 50);
        insert(&mut raw, Uid(300), 20).unwrap();
        assert_eq!(key_count(&raw), 3);
        assert_eq!((son(&raw, 0), key(&raw, 0)), (Uid(100), 20));
        assert_eq!((son(&raw, 1), key(&raw, 1)), (Uid(300), 50));
        assert_eq!((son(&raw, 2), key(&raw, 2)), (Uid(200), i64::MAX));
    }

    #[test]
    fn insert_past_end_moves_to_sibling() {
        let mut raw = empty_root_raw();
        insert(&mut raw, Uid(1), 10).unwrap();
        set_sibling(&mut raw, Uid(77));
        assert_eq!(insert(&mut raw, Uid(2), 11), Err(Uid(77)));
        assert!(insert(&mut raw, Uid(2), 5).is_ok());
    }

    #[test]
    fn right_half_takes_upper_slots() {
        let mut raw = empty_root_raw();
        for k in 0..(2 * BALANCE) as i64 {
            insert(&mut raw, Uid(k as u64), k).unwrap();
        }
        set_sibling(&mut raw, Uid(9));
        let right = right_half(&raw);
        assert!(is_leaf(&right));
        assert_eq!(key_count(&right), BALANCE);
        assert_eq!(key(&right, 0), BALANCE as i64);
        assert_eq!(sibling(&right), Uid(9));
    }
}
