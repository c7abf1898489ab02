//! Versioned entry layout: `[xmin:8][xmax:8][data]`.
//!
//! `xmin` is the creating transaction, `xmax` the deleting one (0 while the
//! entry is live). Only `xmax` is ever rewritten.

use crate::storage::dm::{DataManager, Record};
use crate::types::{KeelError, Result, Uid, Xid};

const OF_XMIN: usize = 0;
const OF_XMAX: usize = OF_XMIN + 8;
const OF_DATA: usize = OF_XMAX + 8;

fn read_xid(raw: &[u8], at: usize) -> Xid {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&raw[at..at + 8]);
    Xid::from_be_bytes(buf)
}

/// Record payload for a fresh entry created by `xid`.
pub(crate) fn wrap(xid: Xid, data: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(OF_DATA + data.len());
    raw.extend_from_slice(&xid.to_be_bytes());
    raw.extend_from_slice(&0u64.to_be_bytes());
    raw.extend_from_slice(data);
    raw
}

/// Creator and deleter of an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Versions {
    pub xmin: Xid,
    pub xmax: Xid,
}

pub(crate) struct Entry {
    record: Record,
}

impl Entry {
    /// Loads the entry at `uid`; `None` when the record is invalid.
    pub(crate) fn load(dm: &DataManager, uid: Uid) -> Result<Option<Self>> {
        let Some(record) = dm.read(uid)? else {
            return Ok(None);
        };
        if record.len() < OF_DATA {
            return Err(KeelError::Corruption("versioned entry too short"));
        }
        Ok(Some(Self { record }))
    }

    pub(crate) fn versions(&self) -> Versions {
        self.record.with_data(|raw| Versions {
            xmin: read_xid(raw, OF_XMIN),
            xmax: read_xid(raw, OF_XMAX),
        })
    }

    pub(crate) fn data(&self) -> Vec<u8> {
        self.record.with_data(|raw| raw[OF_DATA..].to_vec())
    }

    /// Marks the entry deleted by `xid`, logged under `xid`.
    pub(crate) fn set_xmax(&self, xid: Xid) -> Result<()> {
        let mut writer = self.record.before();
        writer.write(|raw| raw[OF_XMAX..OF_DATA].copy_from_slice(&xid.to_be_bytes()));
        writer.after(xid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EngineOptions;
    use tempfile::tempdir;

    #[test]
    fn wrap_leaves_xmax_clear() {
        let raw = wrap(9, b"row");
        assert_eq!(raw.len(), OF_DATA + 3);
        assert_eq!(read_xid(&raw, OF_XMIN), 9);
        assert_eq!(read_xid(&raw, OF_XMAX), 0);
        assert_eq!(&raw[OF_DATA..], b"row");
    }

    #[test]
    fn set_xmax_rewrites_only_the_deleter() -> Result<()> {
        let dir = tempdir().expect("tmpdir");
        let dm = DataManager::create(&dir.path().join("e"), &EngineOptions::default())?;
        let uid = dm.insert(3, &wrap(3, b"payload"))?;
        let entry = Entry::load(&dm, uid)?.expect("entry");
        entry.set_xmax(4)?;
        assert_eq!(entry.versions(), Versions { xmin: 3, xmax: 4 });
        assert_eq!(entry.data(), b"payload");
        Ok(())
    }
}
