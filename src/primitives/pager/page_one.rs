//! Page 1: the shutdown validity stamp.
//!
//! On open a random 8-byte stamp is written at `100..108`; a clean close
//! copies it to `108..116`. If the two differ at the next open the database
//! was not shut down cleanly and must be recovered.

use rand::RngCore;

use super::{Page, PAGE_SIZE};

const OF_VC: usize = 100;
const LEN_VC: usize = 8;

/// Fresh image for page 1 carrying an open stamp.
pub fn init_raw() -> Vec<u8> {
    let mut raw = vec![0u8; PAGE_SIZE];
    stamp_open(&mut raw);
    raw
}

/// Writes a new random open stamp.
pub fn set_vc_open(page: &Page) {
    stamp_open(&mut page.data_mut());
}

/// Copies the open stamp into the close slot.
pub fn set_vc_close(page: &Page) {
    let mut raw = page.data_mut();
    raw.copy_within(OF_VC..OF_VC + LEN_VC, OF_VC + LEN_VC);
}

/// True if the page was closed cleanly after its last open.
pub fn check_vc(page: &Page) -> bool {
    let raw = page.data();
    raw[OF_VC..OF_VC + LEN_VC] == raw[OF_VC + LEN_VC..OF_VC + 2 * LEN_VC]
}

fn stamp_open(raw: &mut [u8]) {
    rand::thread_rng().fill_bytes(&mut raw[OF_VC..OF_VC + LEN_VC]);
}
