// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    alternate::Alternate,
    coding::{Decode, DecodeError, Encode, EncodeError},
    event::{Event, Wakeup, COOKIE_FRAG_WRITTEN, COOKIE_WRITER_GONE},
    key::{CacheKey, VcId},
    range::{ByteRange, RangeSpec},
    side_buffer::{ContentSpan, SideBufferList},
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::VecDeque;
use std::io::{Read, Write};

/// A writer attached to a slice, with the content span it intends to
/// produce. The span shrinks as fragment writes complete so waiting
/// readers can judge how soon a writer will reach them.
#[derive(Clone, Copy, Debug)]
pub struct WriterInfo {
    /// The write VC.
    pub vc: VcId,

    /// Object offset the writer will produce next.
    pub offset: u64,

    /// Bytes the writer still intends to produce.
    pub remnant: u64,
}

/// One temporally distinct snapshot of an alternate.
///
/// Usually an alternate has a single slice. A second slice appears when
/// stale content is being served while a fresh writer updates the
/// alternate: the stale data stays on the old slice for its readers and
/// the update builds a new head slice. Slices are told apart by the
/// generation number.
#[derive(Debug)]
pub struct Slice {
    /// Stable alternate id, shared by all slices of the group.
    pub alt_id: u32,

    /// Detects replacement of this snapshot by a newer one.
    pub generation: u16,

    /// The alternate data of this snapshot.
    pub alternate: Alternate,

    /// Slice differs from its persisted image.
    pub dirty: bool,

    writers: Vec<WriterInfo>,

    /// Writers whose last I/O issuance has not completed, with the
    /// fragment each is writing.
    active: Vec<(VcId, u32)>,

    /// Readers parked on a fragment a writer has yet to produce.
    waiting: Vec<(VcId, u32)>,

    side_buffers: SideBufferList,
}

impl Slice {
    fn new(alt_id: u32, generation: u16, alternate: Alternate) -> Self {
        Self {
            alt_id,
            generation,
            alternate,
            dirty: false,
            writers: Vec::new(),
            active: Vec::new(),
            waiting: Vec::new(),
            side_buffers: SideBufferList::new(),
        }
    }

    /// Whether any writer references this slice.
    #[must_use]
    pub fn has_writers(&self) -> bool {
        !self.writers.is_empty()
    }

    /// The attached writers.
    #[must_use]
    pub fn writers(&self) -> &[WriterInfo] {
        &self.writers
    }

    /// Number of parked readers.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Attaches a writer that intends to produce `remnant` bytes starting
    /// at `offset`.
    pub fn attach_writer(&mut self, vc: VcId, offset: u64, remnant: u64) {
        if let Some(info) = self.writers.iter_mut().find(|w| w.vc == vc) {
            info.offset = offset;
            info.remnant = remnant;
        } else {
            self.writers.push(WriterInfo {
                vc,
                offset,
                remnant,
            });
        }
    }

    /// Records an issued write I/O for the fragment containing `offset`.
    pub fn write_active(&mut self, vc: VcId, offset: u64) {
        let fragment = self.alternate.frag_index_of(offset);
        log::trace!("writer {vc} active on fragment {fragment} at {offset}");

        if !self.active.iter().any(|&(v, _)| v == vc) {
            self.active.push((vc, fragment));
        }
    }

    /// Whether a write I/O is in flight for the fragment at `offset`.
    #[must_use]
    pub fn is_write_active(&self, offset: u64) -> bool {
        let fragment = self.alternate.frag_index_of(offset);
        self.active.iter().any(|&(_, f)| f == fragment)
    }

    /// Completes an issued write.
    ///
    /// On success the fragment is marked cached. All readers parked on the
    /// same fragment are moved to the returned wake list carrying the
    /// produced bytes; waiters on other fragments are retained.
    pub fn write_complete(
        &mut self,
        vc: VcId,
        buffer: &ContentSpan,
        success: bool,
    ) -> Vec<Wakeup> {
        let fragment = match self.active.iter().position(|&(v, _)| v == vc) {
            Some(i) => self.active.swap_remove(i).1,
            None => self.alternate.frag_index_of(buffer.position),
        };

        log::debug!(
            "writer {vc} wrote {} bytes at {} ({})",
            buffer.len(),
            buffer.position,
            if success { "ok" } else { "failed" }
        );

        if success {
            self.alternate.mark_frag_write(fragment);
            self.dirty = true;

            if let Some(info) = self.writers.iter_mut().find(|w| w.vc == vc) {
                info.offset = buffer.end();
                info.remnant = info.remnant.saturating_sub(buffer.len());
            }
        }

        // kick all same-fragment waiters, success or fail
        let mut wakeups = Vec::new();
        self.waiting.retain(|&(reader, frag)| {
            if frag == fragment {
                wakeups.push(Wakeup {
                    vc: reader,
                    event: Event::Immediate,
                    cookie: COOKIE_FRAG_WRITTEN,
                    buffer: Some(buffer.clone()),
                });
                false
            } else {
                true
            }
        });
        wakeups
    }

    /// Parks `vc` until the fragment containing `offset` is written.
    ///
    /// Returns `false` when no writer is scheduled to produce it.
    pub fn wait_for(&mut self, vc: VcId, offset: u64) -> bool {
        if !self.has_writers() {
            return false;
        }

        let fragment = self.alternate.frag_index_of(offset);
        if !self.waiting.iter().any(|&(v, _)| v == vc) {
            self.waiting.push((vc, fragment));
        }
        true
    }

    /// Detaches a writer.
    ///
    /// When the last writer leaves, remaining waiters can never be woken
    /// normally, so they are all kicked with the writer-gone cookie.
    pub fn close_writer(&mut self, vc: VcId) -> Vec<Wakeup> {
        self.writers.retain(|w| w.vc != vc);
        self.active.retain(|&(v, _)| v != vc);

        if self.writers.is_empty() {
            self.waiting
                .drain(..)
                .map(|(reader, _)| {
                    log::debug!("no writers left, waking reader {reader}");
                    Wakeup {
                        vc: reader,
                        event: Event::Immediate,
                        cookie: COOKIE_WRITER_GONE,
                        buffer: None,
                    }
                })
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Drops a parked reader, e.g. when it is cancelled.
    pub fn remove_waiter(&mut self, vc: VcId) {
        self.waiting.retain(|&(v, _)| v != vc);
    }

    /// Stashes origin bytes that could not be flushed to disk yet.
    pub fn add_side_buffer(&mut self, block: &[u8], position: u64) {
        self.side_buffers.add(block, position);
    }

    /// Retrieves side-buffer content covering `[position, position + length)`.
    #[must_use]
    pub fn get_side_buffer(&self, position: u64, length: u64) -> Option<ContentSpan> {
        self.side_buffers.get(position, length)
    }
}

/// Tracks a particular slice of an alternate across vector mutations.
///
/// Readers hold one of these instead of a reference: the group index is
/// only a hint, the (alt id, generation) pair is authoritative.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SliceRef {
    /// Group index at the time the reference was taken.
    pub alt_idx: usize,

    /// Stable alternate id.
    pub alt_id: u32,

    /// Generation of the referenced snapshot.
    pub generation: u16,
}

/// One alternate identity: a stack of slices, head = newest.
///
/// Only the head slice accepts new writes; older slices serve readers
/// still attached to them.
#[derive(Debug)]
pub struct AltGroup {
    /// Stable alternate id.
    pub alt_id: u32,

    slices: Vec<Slice>,
}

impl AltGroup {
    /// The newest slice.
    #[must_use]
    pub fn head(&self) -> &Slice {
        &self.slices[0]
    }

    /// The newest slice, mutably.
    pub fn head_mut(&mut self) -> &mut Slice {
        &mut self.slices[0]
    }

    /// All slices, newest first.
    #[must_use]
    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    /// Drops non-head slices nothing references anymore.
    pub fn collect_idle_slices(&mut self) {
        let keep_head = self.slices.first().map(|s| s.generation);
        self.slices.retain(|s| {
            Some(s.generation) == keep_head || s.has_writers() || s.waiting_count() > 0
        });
    }
}

/// The per-object collection of alternates.
#[derive(Debug, Default)]
pub struct AltVector {
    groups: Vec<AltGroup>,
    alt_id_counter: u32,
}

impl AltVector {
    /// Creates an empty vector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of alternates.
    #[must_use]
    pub fn count(&self) -> usize {
        self.groups.len()
    }

    /// Whether there are no alternates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The groups.
    #[must_use]
    pub fn groups(&self) -> &[AltGroup] {
        &self.groups
    }

    /// Head alternate of the group at `idx`.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Alternate> {
        self.groups.get(idx).map(|g| &g.head().alternate)
    }

    /// Head slice of the group at `idx`.
    #[must_use]
    pub fn slice(&self, idx: usize) -> Option<&Slice> {
        self.groups.get(idx).map(AltGroup::head)
    }

    /// Head slice of the group at `idx`, mutably.
    pub fn slice_mut(&mut self, idx: usize) -> Option<&mut Slice> {
        self.groups.get_mut(idx).map(AltGroup::head_mut)
    }

    /// Installs an alternate.
    ///
    /// With `idx == None` a new group is appended. With an existing index
    /// a fresh head slice is pushed onto that group, bumping the
    /// generation; in-flight readers of the old head keep their slice.
    pub fn insert(&mut self, alternate: Alternate, idx: Option<usize>) -> usize {
        match idx {
            Some(i) if i < self.groups.len() => {
                let group = &mut self.groups[i];
                let generation = group.head().generation.wrapping_add(1);
                let alt_id = group.alt_id;
                group.slices.insert(0, Slice::new(alt_id, generation, alternate));
                i
            }
            _ => {
                let alt_id = self.alt_id_counter;
                self.alt_id_counter += 1;

                self.groups.push(AltGroup {
                    alt_id,
                    slices: vec![Slice::new(alt_id, 0, alternate)],
                });
                self.groups.len() - 1
            }
        }
    }

    /// Index of the group whose head is anchored at `alt_key`.
    #[must_use]
    pub fn index_of(&self, alt_key: &CacheKey) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.head().alternate.earliest_key() == *alt_key)
    }

    /// Finds any slice (not just heads) anchored at `earliest_key`.
    ///
    /// This is how readers orphaned by a slice replacement re-bind.
    #[must_use]
    pub fn slice_ref_for(&self, earliest_key: &CacheKey) -> Option<SliceRef> {
        for (idx, group) in self.groups.iter().enumerate() {
            for slice in &group.slices {
                if slice.alternate.earliest_key() == *earliest_key {
                    return Some(SliceRef {
                        alt_idx: idx,
                        alt_id: slice.alt_id,
                        generation: slice.generation,
                    });
                }
            }
        }
        None
    }

    /// Resolves a slice reference, if the snapshot still exists.
    #[must_use]
    pub fn resolve(&self, slice_ref: &SliceRef) -> Option<&Slice> {
        let group = self
            .groups
            .get(slice_ref.alt_idx)
            .filter(|g| g.alt_id == slice_ref.alt_id)
            .or_else(|| self.groups.iter().find(|g| g.alt_id == slice_ref.alt_id))?;

        group
            .slices
            .iter()
            .find(|s| s.generation == slice_ref.generation)
    }

    /// Resolves a slice reference mutably.
    pub fn resolve_mut(&mut self, slice_ref: &SliceRef) -> Option<&mut Slice> {
        let idx = if self
            .groups
            .get(slice_ref.alt_idx)
            .is_some_and(|g| g.alt_id == slice_ref.alt_id)
        {
            slice_ref.alt_idx
        } else {
            self.groups
                .iter()
                .position(|g| g.alt_id == slice_ref.alt_id)?
        };

        self.groups[idx]
            .slices
            .iter_mut()
            .find(|s| s.generation == slice_ref.generation)
    }

    /// Removes the group at `idx` and hands back its head alternate.
    #[must_use]
    pub fn detach(&mut self, idx: usize) -> Alternate {
        let group = self.groups.remove(idx);
        group
            .slices
            .into_iter()
            .next()
            .expect("group holds at least one slice")
            .alternate
    }

    /// Erases the group at `idx`.
    pub fn remove(&mut self, idx: usize) {
        self.groups.remove(idx);
    }

    /// Compacts out alternates that never materialized (their earliest
    /// fragment is not cached).
    pub fn clean(&mut self) {
        self.groups
            .retain(|g| g.head().alternate.earliest().is_cached());
    }

    /// Empties the vector.
    pub fn clear(&mut self) {
        self.groups.clear();
    }

    /// Applies `f` to every slice of every group.
    pub fn for_each_slice<F: FnMut(&mut Slice)>(&mut self, mut f: F) {
        for group in &mut self.groups {
            for slice in &mut group.slices {
                f(slice);
            }
        }
    }

    /// Whether the alternate at `alt_key` has writers.
    #[must_use]
    pub fn has_writer(&self, alt_key: &CacheKey) -> bool {
        self.index_of(alt_key)
            .and_then(|i| self.slice(i))
            .is_some_and(Slice::has_writers)
    }

    /// Fragment key for `offset` on the alternate at `alt_key`.
    #[must_use]
    pub fn key_for(&self, alt_key: &CacheKey, offset: u64) -> Option<CacheKey> {
        let idx = self.index_of(alt_key)?;
        let alt = &self.slice(idx)?.alternate;
        Some(alt.frag_key(alt.frag_index_of(offset)))
    }

    /// See [`Slice::write_active`].
    pub fn write_active(&mut self, alt_key: &CacheKey, vc: VcId, offset: u64) {
        if let Some(slice) = self.head_slice_for(alt_key) {
            slice.write_active(vc, offset);
        }
    }

    /// See [`Slice::is_write_active`].
    #[must_use]
    pub fn is_write_active(&self, alt_key: &CacheKey, offset: u64) -> bool {
        self.index_of(alt_key)
            .and_then(|i| self.slice(i))
            .is_some_and(|s| s.is_write_active(offset))
    }

    /// See [`Slice::write_complete`].
    pub fn write_complete(
        &mut self,
        alt_key: &CacheKey,
        vc: VcId,
        buffer: &ContentSpan,
        success: bool,
    ) -> Vec<Wakeup> {
        match self.head_slice_for(alt_key) {
            Some(slice) => slice.write_complete(vc, buffer, success),
            None => Vec::new(),
        }
    }

    /// See [`Slice::wait_for`].
    pub fn wait_for(&mut self, alt_key: &CacheKey, vc: VcId, offset: u64) -> bool {
        match self.head_slice_for(alt_key) {
            Some(slice) => slice.wait_for(vc, offset),
            None => false,
        }
    }

    /// See [`Slice::close_writer`]. Also collects idle stale slices.
    pub fn close_writer(&mut self, alt_key: &CacheKey, vc: VcId) -> Vec<Wakeup> {
        let mut wakeups = Vec::new();

        if let Some(idx) = self.index_of(alt_key) {
            let group = &mut self.groups[idx];
            for slice in &mut group.slices {
                wakeups.append(&mut slice.close_writer(vc));
            }
            group.collect_idle_slices();
        }
        wakeups
    }

    /// See [`Slice::add_side_buffer`].
    pub fn add_side_buffer(&mut self, alt_key: &CacheKey, block: &[u8], position: u64) {
        if let Some(slice) = self.head_slice_for(alt_key) {
            slice.add_side_buffer(block, position);
        }
    }

    /// See [`Slice::get_side_buffer`].
    #[must_use]
    pub fn get_side_buffer(
        &self,
        alt_key: &CacheKey,
        position: u64,
        length: u64,
    ) -> Option<ContentSpan> {
        self.index_of(alt_key)
            .and_then(|i| self.slice(i))
            .and_then(|s| s.get_side_buffer(position, length))
    }

    /// Convex hull of the bytes that must be fetched from origin, taking
    /// current writers into account.
    ///
    /// Writers already filling the head of the hull within a proximity of
    /// sixteen fragments are worth waiting on, so their spans are clipped
    /// off the front. Writers far ahead of the hull are left alone. The
    /// pass budget bounds re-examination of writers that could not be
    /// matched yet.
    #[must_use]
    pub fn get_uncached_hull(
        &self,
        alt_key: &CacheKey,
        request: &RangeSpec,
        initial: u64,
    ) -> Option<ByteRange> {
        let idx = self.index_of(alt_key)?;
        let slice = self.slice(idx)?;

        let mut range = slice.alternate.uncached_hull(request, initial)?;
        let delta = slice.alternate.fixed_fragment_size() * 16;

        let mut work: VecDeque<WriterInfo> = slice.writers.iter().copied().collect();
        let mut budget = work.len() * (work.len() + 1);

        while range.min < range.max && budget > 0 {
            let Some(writer) = work.pop_front() else {
                break;
            };
            budget -= 1;

            let base = writer.offset;
            let span = writer.remnant;

            if base + span < range.min || base > range.max {
                // of no use, ignore
            } else if base < range.min + delta {
                // close enough to wait on, clip its span off the hull
                range.min = base + span;
            } else {
                // maybe useful once another writer clips, recheck later
                work.push_back(writer);
            }
        }

        (range.min <= range.max).then_some(range)
    }

    /// Serialized length of the vector.
    #[must_use]
    pub fn marshal_length(&self) -> usize {
        self.encode_into_vec().map_or(0, |v| v.len())
    }

    /// Reconstructs a vector from its serialized form.
    ///
    /// Unreadable or truncated input yields an error and no vector.
    pub fn unmarshal(bytes: &[u8]) -> crate::Result<Self> {
        let mut reader = bytes;
        let vector = Self::decode_from(&mut reader)?;
        Ok(vector)
    }

    fn head_slice_for(&mut self, alt_key: &CacheKey) -> Option<&mut Slice> {
        let idx = self.index_of(alt_key)?;
        self.slice_mut(idx)
    }
}

impl Encode for AltVector {
    /// Only the head slice of each group is persisted; older snapshots
    /// exist for in-flight readers and die with the process.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        // NOTE: Truncation is okay, alternate counts are tiny
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<BigEndian>(self.groups.len() as u32)?;

        for group in &self.groups {
            group.head().alternate.encode_into(writer)?;
        }
        Ok(())
    }
}

impl Decode for AltVector {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let count = reader.read_u32::<BigEndian>()?;

        let mut vector = Self::new();
        for _ in 0..count {
            let alternate = Alternate::decode_from(reader)?;
            vector.insert(alternate, None);
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HttpHeader;

    const FF: u64 = 64 * 1024;

    fn alternate(tag: u64, size: u64) -> Alternate {
        let mut resp = HttpHeader::new("200");
        resp.set("Content-Length", size.to_string());
        Alternate::new(
            HttpHeader::new("GET /object"),
            resp,
            CacheKey::new(tag, tag),
            FF,
        )
    }

    #[test]
    fn insert_and_find_by_key() {
        let mut vector = AltVector::new();
        let a = vector.insert(alternate(1, FF), None);
        let b = vector.insert(alternate(2, FF), None);

        assert_eq!(2, vector.count());
        assert_ne!(
            vector.groups()[a].alt_id,
            vector.groups()[b].alt_id
        );
        assert_eq!(Some(1), vector.index_of(&CacheKey::new(2, 2)));
        assert_eq!(None, vector.index_of(&CacheKey::new(9, 9)));
    }

    #[test]
    fn reinstall_pushes_new_generation() {
        let mut vector = AltVector::new();
        let idx = vector.insert(alternate(1, FF), None);

        let stale_ref = vector
            .slice_ref_for(&CacheKey::new(1, 1))
            .expect("slice exists");

        // keep a writer on the old head so it survives collection
        vector
            .resolve_mut(&stale_ref)
            .expect("resolves")
            .attach_writer(99, 0, FF);

        vector.insert(alternate(7, FF), Some(idx));

        let head = vector.slice(idx).expect("head");
        assert_eq!(1, head.generation);
        assert_eq!(CacheKey::new(7, 7), head.alternate.earliest_key());

        // the stale snapshot is still reachable through its reference
        let stale = vector.resolve(&stale_ref).expect("stale slice lives");
        assert_eq!(0, stale.generation);
        assert_eq!(CacheKey::new(1, 1), stale.alternate.earliest_key());

        // and by its earliest key
        let rebind = vector
            .slice_ref_for(&CacheKey::new(1, 1))
            .expect("rebind works");
        assert_eq!(stale_ref.alt_id, rebind.alt_id);
        assert_eq!(stale_ref.generation, rebind.generation);
    }

    #[test]
    fn detach_shifts_remaining_groups() {
        let mut vector = AltVector::new();
        vector.insert(alternate(1, FF), None);
        vector.insert(alternate(2, FF), None);
        vector.insert(alternate(3, FF), None);

        let detached = vector.detach(1);
        assert_eq!(CacheKey::new(2, 2), detached.earliest_key());
        assert_eq!(2, vector.count());
        assert_eq!(Some(0), vector.index_of(&CacheKey::new(1, 1)));
        assert_eq!(Some(1), vector.index_of(&CacheKey::new(3, 3)));
    }

    #[test]
    fn clean_drops_unrealized_alternates() {
        let mut vector = AltVector::new();
        vector.insert(alternate(1, FF), None);
        vector.insert(alternate(2, FF), None);

        vector
            .slice_mut(0)
            .expect("head")
            .alternate
            .mark_frag_write(0);

        vector.clean();
        assert_eq!(1, vector.count());
        assert_eq!(Some(0), vector.index_of(&CacheKey::new(1, 1)));
    }

    #[test]
    fn write_complete_wakes_same_fragment_waiters() {
        let mut vector = AltVector::new();
        let key = CacheKey::new(1, 1);
        vector.insert(alternate(1, FF * 8), None);

        let slice = vector.slice_mut(0).expect("head");
        slice.attach_writer(1, 0, FF * 8);

        // reader 10 waits on fragment 0, reader 11 on fragment 2
        assert!(vector.wait_for(&key, 10, 0));
        assert!(vector.wait_for(&key, 11, FF * 2));

        let buffer = ContentSpan::new(0, vec![0u8; FF as usize]);
        vector.write_active(&key, 1, 0);
        let wakeups = vector.write_complete(&key, 1, &buffer, true);

        assert_eq!(1, wakeups.len());
        assert_eq!(10, wakeups[0].vc);
        assert_eq!(COOKIE_FRAG_WRITTEN, wakeups[0].cookie);
        assert!(wakeups[0].buffer.is_some());

        // the other reader is still parked
        assert_eq!(1, vector.slice(0).expect("head").waiting_count());
        assert!(vector.slice(0).expect("head").alternate.is_frag_cached(0));
    }

    #[test]
    fn close_last_writer_kicks_all_waiters() {
        let mut vector = AltVector::new();
        let key = CacheKey::new(1, 1);
        vector.insert(alternate(1, FF * 8), None);

        vector.slice_mut(0).expect("head").attach_writer(1, 0, FF * 8);
        assert!(vector.wait_for(&key, 10, 0));
        assert!(vector.wait_for(&key, 11, FF * 4));

        let wakeups = vector.close_writer(&key, 1);
        assert_eq!(2, wakeups.len());
        assert!(wakeups.iter().all(|w| w.cookie == COOKIE_WRITER_GONE));
        assert!(!vector.has_writer(&key));
    }

    #[test]
    fn wait_for_without_writer_fails() {
        let mut vector = AltVector::new();
        let key = CacheKey::new(1, 1);
        vector.insert(alternate(1, FF * 8), None);

        assert!(!vector.wait_for(&key, 10, 0));
    }

    #[test]
    fn hull_clips_against_close_writer() {
        // object 1 MiB, fragment 64 KiB, fragments 0..=3 cached,
        // a writer holds [4 * FF, 7 * FF)
        let mut vector = AltVector::new();
        let key = CacheKey::new(1, 1);
        vector.insert(alternate(1, FF * 16), None);

        {
            let slice = vector.slice_mut(0).expect("head");
            for idx in 0..4 {
                slice.alternate.mark_frag_write(idx);
            }
            slice.attach_writer(1, 4 * FF, 3 * FF);
        }

        let mut spec = RangeSpec::parse("bytes=0-1048575").expect("should parse");
        assert!(spec.apply(FF * 16));

        let hull = vector
            .get_uncached_hull(&key, &spec, 0)
            .expect("hull exists");
        assert_eq!(7 * FF, hull.min);
        assert_eq!(FF * 16 - 1, hull.max);
    }

    #[test]
    fn hull_ignores_far_writer() {
        let mut vector = AltVector::new();
        let key = CacheKey::new(1, 1);
        // small fragments so the writer sits past the proximity window
        let mut resp = HttpHeader::new("200");
        resp.set("Content-Length", (1024u64 * 64).to_string());
        vector.insert(
            Alternate::new(HttpHeader::new("GET /object"), resp, key, 1024),
            None,
        );

        vector
            .slice_mut(0)
            .expect("head")
            .attach_writer(1, 40 * 1024, 1024);

        let spec = RangeSpec::default();
        let hull = vector
            .get_uncached_hull(&key, &spec, 0)
            .expect("hull exists");
        // writer at 40 KiB is beyond 16 fragments (16 KiB), hull untouched
        assert_eq!(0, hull.min);
        assert_eq!(64 * 1024 - 1, hull.max);
    }

    #[test]
    fn marshal_roundtrip_keeps_head_slices() -> crate::Result<()> {
        let mut vector = AltVector::new();
        vector.insert(alternate(1, FF * 2), None);
        vector.insert(alternate(2, FF), None);

        // live-only state must not be persisted
        vector.slice_mut(0).expect("head").attach_writer(1, 0, FF);
        vector
            .slice_mut(0)
            .expect("head")
            .add_side_buffer(&[1, 2, 3], 0);

        let bytes = vector.encode_into_vec()?;
        let back = AltVector::unmarshal(&bytes)?;

        assert_eq!(vector.count(), back.count());
        for idx in 0..vector.count() {
            assert_eq!(
                vector.get(idx).expect("alt"),
                back.get(idx).expect("alt")
            );
        }
        assert!(!back.slice(0).expect("head").has_writers());
        Ok(())
    }

    #[test]
    fn unmarshal_of_truncated_input_fails() {
        let mut vector = AltVector::new();
        vector.insert(alternate(1, FF), None);

        let bytes = vector.encode_into_vec().expect("encode");
        assert!(AltVector::unmarshal(&bytes[..bytes.len() - 1]).is_err());
    }
}
