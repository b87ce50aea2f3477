//! Classic (v1) keystream: the Park–Miller "minimal standard" generator.
//!
//! `s(n+1) = 16807 · s(n) mod (2^31 − 1)`, and keystream byte `i` is the low
//! byte of `s(i+1)`. Because the generator is purely multiplicative,
//! `s(n) = seed · 16807^n mod (2^31 − 1)`, so any position can be reached
//! with one modular exponentiation instead of replaying the prefix.
//!
//! Seeds are only 31 bits wide and come from a 32-bit CRC, so two paths in
//! one archive share a keystream whenever their CRC-32s collide or their
//! mixed values differ by exactly `MODULUS - 1`. Entry separation in v1 is
//! therefore probabilistic; v2 keys each entry from the full path instead.

pub const MODULUS: u64 = 0x7FFF_FFFF;
pub const MULTIPLIER: u64 = 16807;

/// Per-entry seed in `1..MODULUS`: the global key mixed with the CRC-32 of
/// the entry path. Zero (and multiples of the modulus) would make the
/// generator collapse, hence the shifted range.
pub fn seed_for(key: u32, path: &str) -> u32 {
    seed_from_mixed(key ^ crc32fast::hash(path.as_bytes()))
}

/// Folds a mixed key/CRC value into `1..MODULUS`. Not injective: values
/// `MODULUS - 1` apart map to the same seed.
pub fn seed_from_mixed(mixed: u32) -> u32 {
    ((mixed as u64 % (MODULUS - 1)) + 1) as u32
}

#[inline]
pub fn next_state(state: u32) -> u32 {
    (state as u64 * MULTIPLIER % MODULUS) as u32
}

/// Generator state after `n` steps from `seed`.
pub fn state_at(seed: u32, n: u64) -> u32 {
    (seed as u64 % MODULUS * mod_pow(MULTIPLIER, n) % MODULUS) as u32
}

fn mod_pow(mut base: u64, mut exp: u64) -> u64 {
    let mut acc = 1u64;
    base %= MODULUS;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc * base % MODULUS;
        }
        base = base * base % MODULUS;
        exp >>= 1;
    }
    acc
}

#[derive(Debug, Clone)]
pub struct ClassicStream {
    seed: u32,
    state: u32,
    pos: u64,
}

impl ClassicStream {
    pub fn new(seed: u32) -> Self {
        Self { seed, state: seed, pos: 0 }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, pos: u64) {
        if pos != self.pos {
            self.state = state_at(self.seed, pos);
            self.pos = pos;
        }
    }

    /// XORs the keystream into `buf`, advancing the position.
    pub fn apply(&mut self, buf: &mut [u8]) {
        let mut s = self.state;
        for b in buf.iter_mut() {
            s = next_state(s);
            *b ^= s as u8;
        }
        self.state = s;
        self.pos += buf.len() as u64;
    }
}
