//! Ordinary data pages: `[fso:2][data...]`.
//!
//! `fso` is the offset of the first free byte. Records are appended at the
//! free-space offset and never move.

use super::{Page, PAGE_SIZE};
use crate::types::{KeelError, Result};

const OF_FREE: usize = 0;
const OF_DATA: usize = 2;

/// Largest record a single data page can hold.
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - OF_DATA;

/// Image of an empty data page.
pub fn init_raw() -> Vec<u8> {
    let mut raw = vec![0u8; PAGE_SIZE];
    set_fso(&mut raw, OF_DATA as u16);
    raw
}

/// Reads the free-space offset from a page image.
pub fn fso(raw: &[u8]) -> u16 {
    u16::from_be_bytes([raw[OF_FREE], raw[OF_FREE + 1]])
}

fn set_fso(raw: &mut [u8], fso: u16) {
    raw[OF_FREE..OF_FREE + 2].copy_from_slice(&fso.to_be_bytes());
}

/// Free bytes remaining on the page.
pub fn free_space(page: &Page) -> usize {
    PAGE_SIZE.saturating_sub(usize::from(fso(&page.data())))
}

/// Appends `raw` at the free-space offset and returns that offset.
pub fn insert(page: &Page, raw: &[u8]) -> Result<u16> {
    let mut buf = page.data_mut();
    let offset = usize::from(fso(&buf));
    let end = offset + raw.len();
    if end > PAGE_SIZE {
        return Err(KeelError::Invalid("record does not fit in page"));
    }
    buf[offset..end].copy_from_slice(raw);
    set_fso(&mut buf, end as u16);
    Ok(offset as u16)
}

/// Redoes an insert at a known offset, raising `fso` if the record ends past it.
pub fn recover_insert(page: &Page, raw: &[u8], offset: u16) -> Result<()> {
    let mut buf = page.data_mut();
    let start = usize::from(offset);
    let end = start + raw.len();
    if start < OF_DATA || end > PAGE_SIZE {
        return Err(KeelError::Corruption("log insert outside page bounds"));
    }
    buf[start..end].copy_from_slice(raw);
    if end > usize::from(fso(&buf)) {
        set_fso(&mut buf, end as u16);
    }
    Ok(())
}

/// Redoes an update: overwrites bytes without touching `fso`.
pub fn recover_update(page: &Page, raw: &[u8], offset: u16) -> Result<()> {
    let mut buf = page.data_mut();
    let start = usize::from(offset);
    let end = start + raw.len();
    if start < OF_DATA || end > PAGE_SIZE {
        return Err(KeelError::Corruption("log update outside page bounds"));
    }
    buf[start..end].copy_from_slice(raw);
    Ok(())
}
