#![forbid(unsafe_code)]

/// Seed multiplier of the rolling hash.
pub const SEED: i32 = 13331;

/// Incremental checksum over byte slices.
pub trait Checksum {
    /// Restarts from the initial state.
    fn reset(&mut self);
    /// Folds `bytes` into the running value.
    fn update(&mut self, bytes: &[u8]);
    /// Current value.
    fn finalize(&self) -> u32;
}

/// Polynomial rolling hash `x = x * 13331 + b` over sign-extended bytes in
/// wrapping 32-bit arithmetic.
#[derive(Clone, Copy, Debug, Default)]
pub struct Rolling13331 {
    state: i32,
}

impl Rolling13331 {
    /// Continues a hash from a previously finalized value.
    pub fn with_seed(seed: u32) -> Self {
        Self {
            state: seed as i32,
        }
    }
}

impl Checksum for Rolling13331 {
    fn reset(&mut self) {
        self.state = 0;
    }

    fn update(&mut self, bytes: &[u8]) {
        let mut x = self.state;
        for &b in bytes {
            x = x.wrapping_mul(SEED).wrapping_add(i32::from(b as i8));
        }
        self.state = x;
    }

    fn finalize(&self) -> u32 {
        self.state as u32
    }
}

/// One-shot rolling checksum of `bytes` starting from `seed`.
pub fn rolling(seed: u32, bytes: &[u8]) -> u32 {
    let mut c = Rolling13331::with_seed(seed);
    c.update(bytes);
    c.finalize()
}

/// Rolling hash widened to 64 bits, used as the index key of string values.
pub fn string_key(bytes: &[u8]) -> i64 {
    let mut x: i64 = 0;
    for &b in bytes {
        x = x.wrapping_mul(i64::from(SEED)).wrapping_add(i64::from(b as i8));
    }
    x
}
