// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    frag_table::{FragmentDescriptor, FragmentTable},
    headers::{HeaderMagic, HttpHeader},
    key::CacheKey,
    range::{ByteRange, RangeSpec},
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

const FLAG_CONTENT_LENGTH_KNOWN: u8 = 0x01;
const FLAG_COMPLETE: u8 = 0x02;

/// One cached variant of an object (a content-negotiated response).
///
/// Holds everything about the variant that is persisted: the request and
/// response headers used for selection, the earliest fragment descriptor
/// (the chain anchor), the fragment table and the object length.
/// Live coordination state (writers, waiting readers, side buffers) lives
/// in the owning slice, not here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alternate {
    /// Request headers this variant was selected by.
    pub request: HttpHeader,

    /// Response headers of the variant.
    pub response: HttpHeader,

    earliest: FragmentDescriptor,
    fragments: Option<FragmentTable>,
    fixed_fragment_size: u64,
    object_size: u64,

    /// Highest fragment index seen plus one.
    frag_count: u32,

    content_length_known: bool,
    complete: bool,
}

impl Alternate {
    /// Creates a fresh alternate anchored at `earliest_key`.
    #[must_use]
    pub fn new(
        request: HttpHeader,
        response: HttpHeader,
        earliest_key: CacheKey,
        fixed_fragment_size: u64,
    ) -> Self {
        assert!(fixed_fragment_size > 0);

        let content_length = response.content_length();

        Self {
            request,
            response,
            earliest: FragmentDescriptor::new(0, earliest_key),
            fragments: None,
            fixed_fragment_size,
            object_size: content_length.unwrap_or(0),
            frag_count: 0,
            content_length_known: content_length.is_some(),
            complete: false,
        }
    }

    /// The earliest-fragment key, which identifies the alternate.
    #[must_use]
    pub fn earliest_key(&self) -> CacheKey {
        self.earliest.key
    }

    /// The earliest fragment descriptor.
    #[must_use]
    pub fn earliest(&self) -> &FragmentDescriptor {
        &self.earliest
    }

    /// Object length in bytes, meaningful once the length is known.
    #[must_use]
    pub fn object_size(&self) -> u64 {
        self.object_size
    }

    /// Updates the object length.
    pub fn set_object_size(&mut self, size: u64) {
        self.object_size = size;
        self.content_length_known = true;
    }

    /// Whether the total length is known.
    #[must_use]
    pub fn content_length_known(&self) -> bool {
        self.content_length_known
    }

    /// Whether all bytes up to EOF are on disk.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Marks all content as on disk.
    pub fn set_complete(&mut self) {
        self.complete = true;
    }

    /// Fixed fragment granularity chosen at write start.
    #[must_use]
    pub fn fixed_fragment_size(&self) -> u64 {
        self.fixed_fragment_size
    }

    /// Highest fragment index seen plus one.
    #[must_use]
    pub fn frag_count(&self) -> u32 {
        self.frag_count
    }

    /// The fragment table, if one was materialized.
    #[must_use]
    pub fn frag_table(&self) -> Option<&FragmentTable> {
        self.fragments.as_ref()
    }

    /// Whether the object fits in the earliest fragment alone.
    #[must_use]
    pub fn is_single_fragment(&self) -> bool {
        self.object_size <= self.fixed_fragment_size && self.fragments.is_none()
    }

    /// Byte offset of fragment `idx`.
    ///
    /// Offsets past the materialized region are computed from the last
    /// stored offset plus whole fixed fragment sizes, so callers can
    /// address fragments without forcing table growth.
    #[must_use]
    pub fn frag_offset(&self, idx: u32) -> u64 {
        if idx == 0 {
            return 0;
        }

        match &self.fragments {
            Some(table) => {
                let last = table.n();
                if idx > last {
                    table.get(last).offset + self.fixed_fragment_size * u64::from(idx - last)
                } else {
                    table.get(idx).offset
                }
            }
            None => self.fixed_fragment_size * u64::from(idx),
        }
    }

    /// Descriptor for fragment `idx`, growing the table as needed.
    pub fn force_frag_at(&mut self, idx: u32) -> &FragmentDescriptor {
        if idx == 0 {
            return &self.earliest;
        }

        let table = self
            .fragments
            .get_or_insert_with(|| FragmentTable::new(self.earliest));

        // size the first growth by the known object length
        let want = if self.content_length_known && self.fixed_fragment_size > 0 {
            // NOTE: Truncation is okay, fragment counts fit easily in u32
            #[allow(clippy::cast_possible_truncation)]
            let by_size = self.object_size.div_ceil(self.fixed_fragment_size) as u32;
            idx.max(by_size)
        } else {
            idx
        };

        table.grow_to(want, self.fixed_fragment_size);
        table.get(idx)
    }

    /// Content key of fragment `idx`.
    #[must_use]
    pub fn frag_key(&self, idx: u32) -> CacheKey {
        if idx == 0 {
            return self.earliest.key;
        }

        match &self.fragments {
            Some(table) if idx <= table.n() => table.get(idx).key,
            Some(table) => {
                let mut key = table.last().key;
                for _ in table.n()..idx {
                    key = key.next();
                }
                key
            }
            None => {
                let mut key = self.earliest.key;
                for _ in 0..idx {
                    key = key.next();
                }
                key
            }
        }
    }

    /// Whether fragment `idx` is on disk.
    #[must_use]
    pub fn is_frag_cached(&self, idx: u32) -> bool {
        if idx == 0 {
            return self.earliest.is_cached();
        }

        match &self.fragments {
            Some(table) if idx <= table.n() => table.get(idx).is_cached(),
            _ => false,
        }
    }

    /// Records a successful fragment write.
    ///
    /// Bumps the contiguous cached index forward as far as possible, and
    /// marks the alternate complete when an unknown-length body has all
    /// bytes up to EOF on disk.
    pub fn mark_frag_write(&mut self, idx: u32) {
        if idx >= self.frag_count {
            self.frag_count = idx + 1;
        }

        if idx == 0 {
            self.earliest.set_cached();
            if let Some(table) = &mut self.fragments {
                table.get_mut(0).set_cached();
            }
        } else {
            self.force_frag_at(idx);
            self.fragments
                .as_mut()
                .expect("table was just forced")
                .get_mut(idx)
                .set_cached();
        }

        let Some(table) = &mut self.fragments else {
            // single-fragment object: cached earliest is all of it
            if self.earliest.is_cached()
                && self.content_length_known
                && self.object_size <= self.fixed_fragment_size
            {
                self.complete = true;
            }
            return;
        };

        if idx <= table.cached_idx() + 1 {
            let frag_count = self.frag_count;
            let cached_idx = table.advance_cached(frag_count);

            if !self.content_length_known
                && self.frag_offset(cached_idx + 1) > self.earliest.offset
            {
                self.complete = true;
            }
        }
    }

    /// Index of the fragment containing `offset`.
    ///
    /// Starts from the fixed-size guess and walks at most a step or two in
    /// the common case of uniform fragments.
    #[must_use]
    pub fn frag_index_of(&self, offset: u64) -> u32 {
        let ff_size = self.fixed_fragment_size;

        let Some(table) = &self.fragments else {
            // NOTE: Truncation is okay, fragment counts fit easily in u32
            #[allow(clippy::cast_possible_truncation)]
            return (offset / ff_size) as u32;
        };

        let n = table.n();
        if n == 0 {
            #[allow(clippy::cast_possible_truncation)]
            return (offset / ff_size) as u32;
        }

        if offset >= table.get(n).offset {
            // in or past the last entry: whole fixed chunks past its offset
            #[allow(clippy::cast_possible_truncation)]
            return n + ((offset - table.get(n).offset) / ff_size) as u32;
        }

        if offset < table.get(1).offset {
            return 0;
        }

        // old data may have irregular offsets, so correct the guess by walking
        #[allow(clippy::cast_possible_truncation)]
        let mut guess = ((offset / ff_size) as u32).clamp(1, n - 1);
        loop {
            if offset < table.get(guess).offset {
                guess -= 1;
            } else if guess < n && offset >= table.get(guess + 1).offset {
                guess += 1;
            } else {
                return guess;
            }
        }
    }

    /// Clips `size` at `offset` so it does not cross a fragment boundary.
    #[must_use]
    pub fn clip_to_frag_boundary(&self, offset: u64, size: u64) -> u64 {
        let frag = self.frag_index_of(offset);
        let end = self.frag_offset(frag + 1);
        size.min(end.saturating_sub(offset))
    }

    /// Convex hull of the uncached fragments intersecting the request.
    ///
    /// `initial` is the earliest offset the caller already has in flight;
    /// if the hull would start below it while the earliest fragment is
    /// missing, the hull is extended to the object start.
    #[must_use]
    pub fn uncached_hull(&self, request: &RangeSpec, initial: u64) -> Option<ByteRange> {
        if self.complete {
            return None;
        }

        let hull = request.convex_hull();
        let mut range;

        if let Some(table) = &self.fragments {
            let (mut lidx, mut ridx) = match hull {
                Some(s) => (
                    i64::from(self.frag_index_of(s.min)),
                    i64::from(self.frag_index_of(s.max)),
                ),
                None => (
                    i64::from(table.cached_idx()) + 1,
                    i64::from(self.frag_index_of(self.object_size)),
                ),
            };

            if lidx < 2 && !self.earliest.is_cached() {
                lidx = 0;
            } else {
                // the earliest is cached, skip ahead past the cached run
                lidx = lidx.max(1);
                #[allow(clippy::cast_sign_loss)]
                while lidx <= ridx && self.is_frag_cached(lidx as u32) {
                    lidx += 1;
                }
            }

            #[allow(clippy::cast_sign_loss)]
            while lidx <= ridx && self.is_frag_cached(ridx as u32) {
                ridx -= 1;
            }

            if lidx > ridx {
                return None;
            }

            #[allow(clippy::cast_sign_loss)]
            let (lidx, ridx) = (lidx as u32, ridx as u32);
            range = ByteRange::new(self.frag_offset(lidx), self.frag_offset(ridx + 1) - 1);
        } else {
            // no fragments past the earliest yet
            let mut min = if self.earliest.is_cached() {
                self.fixed_fragment_size
            } else {
                0
            };
            let max = match hull {
                Some(s) => {
                    min = min.max(s.min);
                    s.max
                }
                None => u64::MAX,
            };
            if min > max {
                return None;
            }
            range = ByteRange::new(min, max);
        }

        if self.content_length_known && range.max >= self.object_size {
            if self.object_size == 0 {
                return None;
            }
            range.max = self.object_size - 1;
        }

        if range.min < initial && !self.earliest.is_cached() {
            range.min = 0;
        }

        (range.min <= range.max).then_some(range)
    }
}

impl Encode for Alternate {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<BigEndian>(HeaderMagic::Marshaled.into())?;

        self.request.encode_into(writer)?;
        self.response.encode_into(writer)?;
        self.earliest.encode_into(writer)?;

        writer.write_u64::<BigEndian>(self.fixed_fragment_size)?;
        writer.write_u64::<BigEndian>(self.object_size)?;
        writer.write_u32::<BigEndian>(self.frag_count)?;

        let mut flags = 0u8;
        if self.content_length_known {
            flags |= FLAG_CONTENT_LENGTH_KNOWN;
        }
        if self.complete {
            flags |= FLAG_COMPLETE;
        }
        writer.write_u8(flags)?;

        match &self.fragments {
            Some(table) => {
                writer.write_u8(1)?;
                table.encode_into(writer)?;
            }
            None => writer.write_u8(0)?,
        }

        Ok(())
    }
}

impl Decode for Alternate {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let magic = reader.read_u32::<BigEndian>()?;
        if HeaderMagic::try_from(magic) != Ok(HeaderMagic::Marshaled) {
            return Err(DecodeError::InvalidMagic("Alternate"));
        }

        let request = HttpHeader::decode_from(reader)?;
        let response = HttpHeader::decode_from(reader)?;
        let earliest = FragmentDescriptor::decode_from(reader)?;

        let fixed_fragment_size = reader.read_u64::<BigEndian>()?;
        if fixed_fragment_size == 0 {
            return Err(DecodeError::InvalidMagic("Alternate"));
        }
        let object_size = reader.read_u64::<BigEndian>()?;
        let frag_count = reader.read_u32::<BigEndian>()?;

        let flags = reader.read_u8()?;
        let content_length_known = (flags & FLAG_CONTENT_LENGTH_KNOWN) != 0;
        let complete = (flags & FLAG_COMPLETE) != 0;

        let fragments = match reader.read_u8()? {
            0 => None,
            1 => Some(FragmentTable::decode_from(reader)?),
            tag => return Err(DecodeError::InvalidTag(("Alternate", tag))),
        };

        Ok(Self {
            request,
            response,
            earliest,
            fragments,
            fixed_fragment_size,
            object_size,
            frag_count,
            content_length_known,
            complete,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FF: u64 = 64 * 1024;

    fn alt_with_size(object_size: u64) -> Alternate {
        let mut resp = HttpHeader::new("200");
        resp.set("Content-Length", object_size.to_string());
        resp.set("Content-Type", "application/octet-stream");

        Alternate::new(
            HttpHeader::new("GET /object"),
            resp,
            CacheKey::new(0x11, 0x22),
            FF,
        )
    }

    #[test]
    fn offsets_follow_fixed_size() {
        let mut alt = alt_with_size(FF * 16);
        assert_eq!(0, alt.frag_offset(0));
        assert_eq!(FF, alt.frag_offset(1));

        alt.force_frag_at(3);
        assert_eq!(3 * FF, alt.frag_offset(3));
        // offsets past the table do not force growth
        assert_eq!(100 * FF, alt.frag_offset(100));
    }

    #[test]
    fn index_of_inverts_offset() {
        let mut alt = alt_with_size(FF * 16);
        alt.force_frag_at(8);

        for idx in [0u32, 1, 2, 7, 8, 15] {
            assert_eq!(idx, alt.frag_index_of(alt.frag_offset(idx)));
            assert_eq!(idx, alt.frag_index_of(alt.frag_offset(idx) + FF - 1));
        }
    }

    #[test]
    fn frag_keys_follow_the_chain() {
        let mut alt = alt_with_size(FF * 4);
        let anchor = alt.earliest_key();

        assert_eq!(anchor, alt.frag_key(0));
        assert_eq!(anchor.next(), alt.frag_key(1));
        assert_eq!(anchor.next().next(), alt.frag_key(2));

        alt.force_frag_at(2);
        assert_eq!(anchor.next().next(), alt.frag_key(2));
    }

    #[test]
    fn mark_write_advances_cached_index() {
        let mut alt = alt_with_size(FF * 4);

        alt.mark_frag_write(0);
        assert!(alt.is_frag_cached(0));

        alt.mark_frag_write(1);
        alt.mark_frag_write(3);
        let table = alt.frag_table().expect("table exists");
        assert_eq!(1, table.cached_idx());

        alt.mark_frag_write(2);
        let table = alt.frag_table().expect("table exists");
        assert_eq!(3, table.cached_idx());
    }

    #[test]
    fn unknown_length_completes_past_received_bytes() {
        let mut alt = Alternate::new(
            HttpHeader::new("GET /stream"),
            HttpHeader::new("200"),
            CacheKey::new(5, 6),
            FF,
        );
        assert!(!alt.content_length_known());

        alt.mark_frag_write(0);
        alt.mark_frag_write(1);
        assert!(alt.is_complete());
    }

    #[test]
    fn clip_to_boundary() {
        let mut alt = alt_with_size(FF * 4);
        alt.force_frag_at(2);

        assert_eq!(FF, alt.clip_to_frag_boundary(0, u64::MAX));
        assert_eq!(10, alt.clip_to_frag_boundary(FF - 10, 100));
    }

    #[test]
    fn roundtrip() -> crate::Result<()> {
        let mut alt = alt_with_size(FF * 8);
        alt.mark_frag_write(0);
        alt.mark_frag_write(1);
        alt.mark_frag_write(2);

        let bytes = alt.encode_into_vec()?;
        let back = Alternate::decode_from(&mut &bytes[..])?;
        assert_eq!(alt, back);
        Ok(())
    }

    #[test]
    fn truncated_input_fails() {
        let alt = alt_with_size(FF);
        let bytes = alt.encode_into_vec().expect("encode");
        assert!(Alternate::decode_from(&mut &bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn hull_of_partially_cached_object() {
        // object: 1 MiB, fragments 0..=3 cached, rest missing
        let mut alt = alt_with_size(FF * 16);
        for idx in 0..4 {
            alt.mark_frag_write(idx);
        }

        let mut spec = RangeSpec::parse("bytes=0-1048575").expect("should parse");
        assert!(spec.apply(FF * 16));

        let hull = alt.uncached_hull(&spec, 0).expect("hull exists");
        assert_eq!(4 * FF, hull.min);
        assert_eq!(FF * 16 - 1, hull.max);
    }

    #[test]
    fn hull_empty_when_complete() {
        let mut alt = alt_with_size(FF);
        alt.mark_frag_write(0);
        alt.set_complete();

        let spec = RangeSpec::default();
        assert!(alt.uncached_hull(&spec, 0).is_none());
    }
}
