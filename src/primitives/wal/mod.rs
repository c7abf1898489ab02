#![forbid(unsafe_code)]

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::checksum::rolling;
use crate::types::{KeelError, Result};

const FILE_HEADER_LEN: u64 = 4;
const RECORD_HEADER_LEN: usize = 8;

/// Statistics tracking log operations since open.
#[derive(Clone, Debug, Default)]
pub struct WalStats {
    /// Records appended.
    pub records_appended: u64,
    /// Bytes appended, record headers included.
    pub bytes_appended: u64,
    /// Bytes cut from the end of the file while opening.
    pub bytes_truncated: u64,
}

#[derive(Clone, Copy, Debug)]
struct RecordHeader {
    size: u32,
    checksum: u32,
}

impl RecordHeader {
    fn encode(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut buf = [0u8; RECORD_HEADER_LEN];
        buf[0..4].copy_from_slice(&self.size.to_be_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    fn decode(src: &[u8; RECORD_HEADER_LEN]) -> Self {
        Self {
            size: u32::from_be_bytes([src[0], src[1], src[2], src[3]]),
            checksum: u32::from_be_bytes([src[4], src[5], src[6], src[7]]),
        }
    }
}

struct WalState {
    /// Checksum over every record in the file, as stored in the header.
    x_checksum: u32,
    /// Offset one past the last valid record.
    end: u64,
    /// Read position of the replay cursor.
    cursor: u64,
    stats: WalStats,
}

/// Append-only write-ahead log.
///
/// File layout: `[xChecksum:4]` followed by `[size:4][checksum:4][payload]`
/// records. `xChecksum` folds the bytes of every record in order, so a
/// record that made it to disk without its header update is detectable.
pub struct Wal {
    io: Arc<dyn FileIo>,
    state: Mutex<WalState>,
}

impl Wal {
    /// Creates an empty log at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let io = StdFileIo::create(path.as_ref())?;
        info!(path = %path.as_ref().display(), "wal.create");
        Self::create_with_io(Arc::new(io))
    }

    /// Opens the log at `path`, dropping any bad tail.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let io = StdFileIo::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "wal.open");
        Self::open_with_io(Arc::new(io))
    }

    /// Writes an empty header to `io`.
    pub fn create_with_io(io: Arc<dyn FileIo>) -> Result<Self> {
        io.truncate(0)?;
        io.write_at(0, &0u32.to_be_bytes())?;
        io.sync_all()?;
        Ok(Self {
            io,
            state: Mutex::new(WalState {
                x_checksum: 0,
                end: FILE_HEADER_LEN,
                cursor: FILE_HEADER_LEN,
                stats: WalStats::default(),
            }),
        })
    }

    /// Validates the records in `io` and truncates the file after the last good one.
    pub fn open_with_io(io: Arc<dyn FileIo>) -> Result<Self> {
        let file_len = io.len()?;
        if file_len < FILE_HEADER_LEN {
            return Err(KeelError::Corruption("bad log file"));
        }
        let mut raw = [0u8; 4];
        io.read_at(0, &mut raw)?;
        let stored = u32::from_be_bytes(raw);

        let mut pos = FILE_HEADER_LEN;
        let mut running = 0u32;
        let mut matched_at = (stored == 0).then_some(FILE_HEADER_LEN);
        while let Some(record) = read_record(io.as_ref(), pos, file_len)? {
            running = rolling(running, &record);
            pos += record.len() as u64;
            if running == stored {
                matched_at = Some(pos);
            }
        }

        let valid_end = if running == stored {
            pos
        } else if let Some(prefix_end) = matched_at {
            warn!(
                scanned_to = pos,
                truncate_to = prefix_end,
                "wal.open records past the header checksum dropped"
            );
            prefix_end
        } else {
            return Err(KeelError::Corruption("log checksum mismatch"));
        };

        let bytes_truncated = file_len - valid_end;
        if bytes_truncated > 0 {
            warn!(valid_end, bytes_truncated, "wal.open truncating bad tail");
            io.truncate(valid_end)?;
            io.sync_all()?;
        }
        debug!(valid_end, "wal.open scan complete");
        Ok(Self {
            io,
            state: Mutex::new(WalState {
                x_checksum: stored,
                end: valid_end,
                cursor: FILE_HEADER_LEN,
                stats: WalStats {
                    bytes_truncated,
                    ..WalStats::default()
                },
            }),
        })
    }

    /// Appends `payload` as a new record and syncs it, then rewrites and
    /// syncs the header checksum.
    pub fn append(&self, payload: &[u8]) -> Result<()> {
        let size = u32::try_from(payload.len())
            .map_err(|_| KeelError::Invalid("log record too large"))?;
        let header = RecordHeader {
            size,
            checksum: rolling(0, payload),
        };
        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
        record.extend_from_slice(&header.encode());
        record.extend_from_slice(payload);

        let mut state = self.state.lock();
        self.io.write_at(state.end, &record)?;
        // durable before any header that counts it
        self.io.sync_all()?;
        let x_checksum = rolling(state.x_checksum, &record);
        self.io.write_at(0, &x_checksum.to_be_bytes())?;
        self.io.sync_all()?;
        state.x_checksum = x_checksum;
        state.end += record.len() as u64;
        state.stats.records_appended += 1;
        state.stats.bytes_appended += record.len() as u64;
        Ok(())
    }

    /// Returns the payload of the next record, or `None` at the end of the log.
    pub fn next(&self) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        match read_record(self.io.as_ref(), state.cursor, state.end)? {
            Some(mut record) => {
                state.cursor += record.len() as u64;
                Ok(Some(record.split_off(RECORD_HEADER_LEN)))
            }
            None => Ok(None),
        }
    }

    /// Moves the replay cursor back to the first record.
    pub fn rewind(&self) {
        self.state.lock().cursor = FILE_HEADER_LEN;
    }

    /// Counters since open.
    pub fn stats(&self) -> WalStats {
        self.state.lock().stats.clone()
    }

    /// Length of the valid portion of the file.
    pub fn len(&self) -> u64 {
        self.state.lock().end
    }

    /// True when the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == FILE_HEADER_LEN
    }

    /// Syncs the file.
    pub fn close(&self) -> Result<()> {
        self.io.sync_all()
    }
}

/// Reads the whole record at `pos` if it fits before `end` and its checksum holds.
fn read_record(io: &dyn FileIo, pos: u64, end: u64) -> Result<Option<Vec<u8>>> {
    if pos + RECORD_HEADER_LEN as u64 > end {
        return Ok(None);
    }
    let mut raw = [0u8; RECORD_HEADER_LEN];
    io.read_at(pos, &mut raw)?;
    let header = RecordHeader::decode(&raw);
    let total = RECORD_HEADER_LEN as u64 + u64::from(header.size);
    if pos + total > end {
        return Ok(None);
    }
    let mut record = vec![0u8; total as usize];
    io.read_at(pos, &mut record)?;
    if rolling(0, &record[RECORD_HEADER_LEN..]) != header.checksum {
        return Ok(None);
    }
    Ok(Some(record))
}
