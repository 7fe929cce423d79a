// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::sync::{atomic::AtomicU64, Arc};

/// 128-bit content address.
///
/// The same type identifies whole objects (the "first key"), alternates
/// (their earliest-fragment key) and individual fragments. Fragment keys
/// form a deterministic chain: fragment *i+1*'s key is [`CacheKey::next`]
/// of fragment *i*'s key, so only the chain anchor has to be stored.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct CacheKey([u64; 2]);

impl CacheKey {
    /// Builds a key from two 64-bit halves.
    #[must_use]
    pub fn new(hi: u64, lo: u64) -> Self {
        Self([hi, lo])
    }

    /// Hashes arbitrary bytes into a key.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let h = xxhash_rust::xxh3::xxh3_128(bytes);

        // NOTE: Truncation is okay, we want the two halves
        #[allow(clippy::cast_possible_truncation)]
        let halves = [(h >> 64) as u64, h as u64];
        Self(halves)
    }

    /// Generates a fresh random key.
    #[must_use]
    pub fn random<R: rand::Rng>(rng: &mut R) -> Self {
        Self([rng.gen(), rng.gen()])
    }

    /// Returns one 64-bit half of the key.
    ///
    /// # Panics
    ///
    /// Panics if `idx > 1`.
    #[must_use]
    pub fn slice64(&self, idx: usize) -> u64 {
        self.0[idx]
    }

    /// Folds the key to 64 bits, e.g. for wake-up cookies.
    #[must_use]
    pub fn fold(&self) -> u64 {
        self.0[0] ^ self.0[1]
    }

    /// Deterministic successor in the fragment-key chain.
    #[must_use]
    pub fn next(&self) -> Self {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&self.0[0].to_be_bytes());
        buf[8..].copy_from_slice(&self.0[1].to_be_bytes());
        Self::from_bytes(&buf)
    }

    /// Whether this is the all-zero key.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0, 0]
    }

    /// Hex rendering, mostly for diagnostics.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("{:016x}{:016x}", self.0[0], self.0[1])
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key prefix is enough to correlate log lines
        write!(f, "{:08x}", (self.0[0] >> 32) as u32)
    }
}

impl Encode for CacheKey {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.0[0])?;
        writer.write_u64::<BigEndian>(self.0[1])?;
        Ok(())
    }
}

impl Decode for CacheKey {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let hi = reader.read_u64::<BigEndian>()?;
        let lo = reader.read_u64::<BigEndian>()?;
        Ok(Self([hi, lo]))
    }
}

/// Identifies one virtual connection (one side of an I/O exchange).
pub type VcId = u64;

/// Hands out unique (monotonically increasing) VC ids.
#[derive(Clone, Default)]
pub struct VcIdGenerator(Arc<AtomicU64>);

impl std::ops::Deref for VcIdGenerator {
    type Target = Arc<AtomicU64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl VcIdGenerator {
    /// Starts the counter at `start`.
    #[must_use]
    pub fn new(start: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start)))
    }

    /// Returns the next id.
    pub fn next(&self) -> VcId {
        self.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_chain_is_deterministic() {
        let k = CacheKey::from_bytes(b"http://example.com/object");
        assert_eq!(k.next(), k.next());
        assert_ne!(k, k.next());
        assert_ne!(k.next(), k.next().next());
    }

    #[test]
    fn key_roundtrip() -> crate::Result<()> {
        let k = CacheKey::new(0xdead_beef_0123_4567, 0x89ab_cdef_aa55_aa55);
        let bytes = k.encode_into_vec()?;
        assert_eq!(16, bytes.len());
        let k2 = CacheKey::decode_from(&mut &bytes[..])?;
        assert_eq!(k, k2);
        Ok(())
    }

    #[test]
    fn fold_mixes_both_halves() {
        let a = CacheKey::new(1, 0);
        let b = CacheKey::new(0, 1);
        assert_eq!(a.fold(), b.fold());
        assert_ne!(CacheKey::new(2, 0).fold(), a.fold());
    }
}
