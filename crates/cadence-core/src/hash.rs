//! Deterministic hashing of scheduler state for desync detection.
//!
//! [`StateHash`] is a 64-bit FNV-1a [`Hasher`]. Integer writes are fed in
//! little-endian order so a hash taken on one machine matches another.

use std::hash::Hasher;

use crate::fixed::Fixed64;
use crate::id::TimerHandle;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Running FNV-1a hash. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(u64);

impl StateHash {
    pub fn new() -> Self {
        Self(FNV_OFFSET)
    }

    pub fn write_fixed64(&mut self, v: Fixed64) {
        self.write_i64(v.to_bits());
    }

    /// A running timer: its handle, then the ticks it has left.
    pub fn write_timer(&mut self, handle: TimerHandle, remaining: u32) {
        self.write_u32(handle.0);
        self.write_u32(remaining);
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for StateHash {
    fn write(&mut self, bytes: &[u8]) {
        self.0 = bytes
            .iter()
            .fold(self.0, |h, &b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME));
    }

    fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    fn write_i32(&mut self, v: i32) {
        self.write(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    fn write_i64(&mut self, v: i64) {
        self.write(&v.to_le_bytes());
    }

    fn finish(&self) -> u64 {
        self.0
    }
}
