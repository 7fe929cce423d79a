// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    key::CacheKey,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Fragment is on disk.
pub const FRAG_FLAG_CACHED: u16 = 0x0001;

/// Describes one fragment of an object body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FragmentDescriptor {
    /// Byte offset of the fragment in the object.
    pub offset: u64,

    /// Content address of the fragment.
    pub key: CacheKey,

    /// Flag bits, see `FRAG_FLAG_*`.
    pub flags: u16,
}

impl FragmentDescriptor {
    /// Creates a descriptor with no flags set.
    #[must_use]
    pub fn new(offset: u64, key: CacheKey) -> Self {
        Self {
            offset,
            key,
            flags: 0,
        }
    }

    /// Whether the fragment is on disk.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        (self.flags & FRAG_FLAG_CACHED) != 0
    }

    /// Marks the fragment as on disk.
    pub fn set_cached(&mut self) {
        self.flags |= FRAG_FLAG_CACHED;
    }
}

impl Encode for FragmentDescriptor {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.offset)?;
        self.key.encode_into(writer)?;
        writer.write_u16::<BigEndian>(self.flags)?;
        Ok(())
    }
}

impl Decode for FragmentDescriptor {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let offset = reader.read_u64::<BigEndian>()?;
        let key = CacheKey::decode_from(reader)?;
        let flags = reader.read_u16::<BigEndian>()?;
        Ok(Self { offset, key, flags })
    }
}

/// Append-growable map from fragment index to descriptor.
///
/// Index 0 mirrors the earliest descriptor held by the owning alternate;
/// indices `1..=n` are the fragments past the earliest. The table only
/// grows - it is dropped wholesale with its alternate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FragmentTable {
    entries: Vec<FragmentDescriptor>,
    cached_idx: u32,
}

impl FragmentTable {
    /// Creates a table anchored at the earliest descriptor.
    #[must_use]
    pub fn new(earliest: FragmentDescriptor) -> Self {
        Self {
            entries: vec![earliest],
            cached_idx: 0,
        }
    }

    /// Highest valid index (the earliest mirror at 0 not counted).
    #[must_use]
    pub fn n(&self) -> u32 {
        // NOTE: Truncation is okay, fragment counts fit easily in u32
        #[allow(clippy::cast_possible_truncation)]
        let n = (self.entries.len() - 1) as u32;
        n
    }

    /// Highest index below which every descriptor is cached.
    #[must_use]
    pub fn cached_idx(&self) -> u32 {
        self.cached_idx
    }

    /// Descriptor at `idx`, which must be materialized.
    ///
    /// # Panics
    ///
    /// Panics if `idx > n`.
    #[must_use]
    pub fn get(&self, idx: u32) -> &FragmentDescriptor {
        &self.entries[idx as usize]
    }

    pub(crate) fn get_mut(&mut self, idx: u32) -> &mut FragmentDescriptor {
        &mut self.entries[idx as usize]
    }

    /// Last materialized descriptor.
    #[must_use]
    pub fn last(&self) -> &FragmentDescriptor {
        self.entries.last().expect("table holds at least the anchor")
    }

    /// Extends the key chain so that `idx` is materialized.
    ///
    /// New slots continue the derived key chain and fixed-size offsets of
    /// the last existing entry. Growth is geometric so repeated forcing
    /// stays linear overall.
    pub fn grow_to(&mut self, idx: u32, fixed_fragment_size: u64) {
        let n = self.n();
        if idx <= n {
            return;
        }

        // at least +4, and at least 50% over the current size
        let target = idx.max(n + (n / 2).max(4));

        let mut key = self.last().key;
        let mut offset = self.last().offset + fixed_fragment_size;

        self.entries.reserve(target as usize - n as usize);
        for _ in n..target {
            key = key.next();
            self.entries.push(FragmentDescriptor::new(offset, key));
            offset += fixed_fragment_size;
        }
    }

    /// Advances `cached_idx` across a run of cached descriptors.
    ///
    /// `limit` bounds the walk to fragments that were actually seen.
    pub(crate) fn advance_cached(&mut self, limit: u32) -> u32 {
        if !self.entries[0].is_cached() {
            return self.cached_idx;
        }

        let mut j = self.cached_idx + 1;
        while j <= self.n() && j < limit && self.get(j).is_cached() {
            j += 1;
        }
        self.cached_idx = j - 1;
        self.cached_idx
    }
}

impl Encode for FragmentTable {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<BigEndian>(self.n())?;
        writer.write_u32::<BigEndian>(self.cached_idx)?;

        for entry in &self.entries {
            entry.encode_into(writer)?;
        }

        Ok(())
    }
}

impl Decode for FragmentTable {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let n = reader.read_u32::<BigEndian>()?;
        let cached_idx = reader.read_u32::<BigEndian>()?;

        if cached_idx > n {
            return Err(DecodeError::InvalidMagic("FragmentTable"));
        }

        let mut entries = Vec::with_capacity(n as usize + 1);
        for _ in 0..=n {
            entries.push(FragmentDescriptor::decode_from(reader)?);
        }

        Ok(Self {
            entries,
            cached_idx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> FragmentDescriptor {
        FragmentDescriptor::new(0, CacheKey::new(7, 7))
    }

    #[test]
    fn grows_with_derived_chain() {
        let mut t = FragmentTable::new(anchor());
        t.grow_to(3, 1024);

        assert!(t.n() >= 3);
        assert_eq!(1024, t.get(1).offset);
        assert_eq!(2048, t.get(2).offset);
        assert_eq!(anchor().key.next(), t.get(1).key);
        assert_eq!(anchor().key.next().next(), t.get(2).key);
    }

    #[test]
    fn growth_is_geometric() {
        let mut t = FragmentTable::new(anchor());
        t.grow_to(1, 64);
        let first = t.n();
        assert!(first >= 4);

        t.grow_to(first + 1, 64);
        assert!(t.n() >= first + first / 2);
    }

    #[test]
    fn cached_idx_needs_contiguous_run() {
        let mut t = FragmentTable::new(anchor());
        t.grow_to(4, 512);

        t.get_mut(0).set_cached();
        t.get_mut(1).set_cached();
        t.get_mut(3).set_cached();

        assert_eq!(1, t.advance_cached(5));

        t.get_mut(2).set_cached();
        assert_eq!(3, t.advance_cached(5));
    }

    #[test]
    fn roundtrip() -> crate::Result<()> {
        let mut t = FragmentTable::new(anchor());
        t.grow_to(2, 4096);
        t.get_mut(0).set_cached();
        t.get_mut(1).set_cached();
        t.advance_cached(3);

        let bytes = t.encode_into_vec()?;
        let back = FragmentTable::decode_from(&mut &bytes[..])?;
        assert_eq!(t, back);
        Ok(())
    }
}
