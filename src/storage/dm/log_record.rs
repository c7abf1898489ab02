use crate::types::{KeelError, PageNo, Result, Uid, Xid};

const TYPE_INSERT: u8 = 0;
const TYPE_UPDATE: u8 = 1;

const INSERT_HEADER_LEN: usize = 1 + 8 + 4 + 2;
const UPDATE_HEADER_LEN: usize = 1 + 8 + 8;

/// Payload of one log record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogRecord {
    /// A record image appended to a page at `offset`.
    Insert {
        /// Owning transaction.
        xid: Xid,
        /// Target page.
        pgno: PageNo,
        /// Offset of the record inside the page.
        offset: u16,
        /// Full record image.
        raw: Vec<u8>,
    },
    /// An in-place rewrite of an existing record.
    Update {
        /// Owning transaction.
        xid: Xid,
        /// Record being rewritten.
        uid: Uid,
        /// Record image before the change.
        old_raw: Vec<u8>,
        /// Record image after the change.
        new_raw: Vec<u8>,
    },
}

impl LogRecord {
    /// Transaction that wrote this record.
    pub fn xid(&self) -> Xid {
        match self {
            LogRecord::Insert { xid, .. } | LogRecord::Update { xid, .. } => *xid,
        }
    }

    /// Page this record touches.
    pub fn pgno(&self) -> PageNo {
        match self {
            LogRecord::Insert { pgno, .. } => *pgno,
            LogRecord::Update { uid, .. } => uid.pgno(),
        }
    }

    /// Big-endian wire form.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            LogRecord::Insert {
                xid,
                pgno,
                offset,
                raw,
            } => {
                let mut buf = Vec::with_capacity(INSERT_HEADER_LEN + raw.len());
                buf.push(TYPE_INSERT);
                buf.extend_from_slice(&xid.to_be_bytes());
                buf.extend_from_slice(&pgno.to_be_bytes());
                buf.extend_from_slice(&offset.to_be_bytes());
                buf.extend_from_slice(raw);
                buf
            }
            LogRecord::Update {
                xid,
                uid,
                old_raw,
                new_raw,
            } => {
                let mut buf =
                    Vec::with_capacity(UPDATE_HEADER_LEN + old_raw.len() + new_raw.len());
                buf.push(TYPE_UPDATE);
                buf.extend_from_slice(&xid.to_be_bytes());
                buf.extend_from_slice(&uid.0.to_be_bytes());
                buf.extend_from_slice(old_raw);
                buf.extend_from_slice(new_raw);
                buf
            }
        }
    }

    /// Parses a payload produced by [`LogRecord::encode`].
    pub fn decode(src: &[u8]) -> Result<Self> {
        match src.first() {
            Some(&TYPE_INSERT) if src.len() >= INSERT_HEADER_LEN => Ok(LogRecord::Insert {
                xid: read_u64(&src[1..9]),
                pgno: u32::from_be_bytes([src[9], src[10], src[11], src[12]]),
                offset: u16::from_be_bytes([src[13], src[14]]),
                raw: src[INSERT_HEADER_LEN..].to_vec(),
            }),
            Some(&TYPE_UPDATE) if src.len() >= UPDATE_HEADER_LEN => {
                let images = &src[UPDATE_HEADER_LEN..];
                if images.len() % 2 != 0 {
                    return Err(KeelError::Corruption("update log images differ in length"));
                }
                let (old_raw, new_raw) = images.split_at(images.len() / 2);
                Ok(LogRecord::Update {
                    xid: read_u64(&src[1..9]),
                    uid: Uid(read_u64(&src[9..17])),
                    old_raw: old_raw.to_vec(),
                    new_raw: new_raw.to_vec(),
                })
            }
            _ => Err(KeelError::Corruption("malformed log record")),
        }
    }
}

fn read_u64(src: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&src[..8]);
    u64::from_be_bytes(buf)
}
