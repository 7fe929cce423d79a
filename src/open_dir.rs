// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    directory::DirEntry,
    event::{Event, Wakeup},
    key::{CacheKey, VcId},
    range::{ByteRange, RangeSpec},
    side_buffer::ContentSpan,
    vector::AltVector,
    HashMap,
};
use std::sync::{Arc, Mutex};

const SHARD_COUNT: usize = 16;

/// Live, in-memory coordination record for an active object.
///
/// One exists per object key while any VC works with the object. It owns
/// the alternate vector and is the rendezvous for read-while-write: all
/// vector, fragment table and side buffer mutations happen under its lock.
#[derive(Debug)]
pub struct OpenDirEntry {
    /// The object key.
    pub first_key: CacheKey,

    /// The alternates of the object.
    pub vector: AltVector,

    /// Location of the header block on disk.
    pub first_dir: Option<DirEntry>,

    /// Key of the resident (single-fragment) alternate, if one is moved.
    pub single_doc_key: Option<CacheKey>,

    /// Directory entry of the resident alternate.
    pub single_doc_dir: Option<DirEntry>,

    /// VCs currently working with this entry.
    pub num_active: u32,

    /// Upper bound on concurrently attached writers.
    pub max_writers: u32,

    /// The resident alternate's directory entry must be inserted when the
    /// vector is rewritten.
    pub move_resident_alt: bool,

    /// A vector write is in flight.
    pub writing_vec: bool,

    open_writer: Option<VcId>,
    open_waiting: Vec<VcId>,
}

impl OpenDirEntry {
    fn new(first_key: CacheKey) -> Self {
        Self {
            first_key,
            vector: AltVector::new(),
            first_dir: None,
            single_doc_key: None,
            single_doc_dir: None,
            num_active: 0,
            max_writers: 1,
            move_resident_alt: false,
            writing_vec: false,
            open_writer: None,
            open_waiting: Vec::new(),
        }
    }

    /// The writer whose alternate-vector update is in flight, if any.
    ///
    /// While set, arriving readers must park on the open-waiting list
    /// instead of selecting an alternate.
    #[must_use]
    pub fn open_writer(&self) -> Option<VcId> {
        self.open_writer
    }

    /// Claims the vector-update slot.
    ///
    /// Returns `false` when another writer holds it.
    pub fn set_open_writer(&mut self, vc: VcId) -> bool {
        match self.open_writer {
            None => {
                self.open_writer = Some(vc);
                true
            }
            Some(holder) => holder == vc,
        }
    }

    /// Parks a reader until the in-flight vector update is published.
    pub fn reader_wait_open(&mut self, vc: VcId) {
        if !self.open_waiting.contains(&vc) {
            self.open_waiting.push(vc);
        }
    }

    /// Number of readers parked on the vector update.
    #[must_use]
    pub fn open_waiting_count(&self) -> usize {
        self.open_waiting.len()
    }

    /// Releases the vector-update slot and wakes every parked reader.
    ///
    /// The wake-up cookie is the folded earliest key of the alternate the
    /// writer chose; each woken reader re-binds to its slice with it.
    pub fn publish_vector_update(&mut self, vc: VcId, chosen: &CacheKey) -> Vec<Wakeup> {
        if self.open_writer == Some(vc) {
            self.open_writer = None;
        }

        let cookie = chosen.fold();
        self.open_waiting
            .drain(..)
            .map(|reader| Wakeup {
                vc: reader,
                event: Event::WriterUpdatedAltTable,
                cookie,
                buffer: None,
            })
            .collect()
    }

    /// Removes a reader from the open-waiting list.
    pub fn remove_open_waiter(&mut self, vc: VcId) {
        self.open_waiting.retain(|&v| v != vc);
    }

    /// Whether the alternate at `alt_key` has writers.
    #[must_use]
    pub fn has_writer(&self, alt_key: &CacheKey) -> bool {
        self.vector.has_writer(alt_key)
    }

    /// Parks `vc` until the fragment containing `offset` of the alternate
    /// at `alt_key` is written. `false` when no writer will produce it.
    pub fn wait_for(&mut self, alt_key: &CacheKey, vc: VcId, offset: u64) -> bool {
        self.vector.wait_for(alt_key, vc, offset)
    }

    /// Completes a fragment write, see [`crate::Slice::write_complete`].
    pub fn write_complete(
        &mut self,
        alt_key: &CacheKey,
        vc: VcId,
        buffer: &ContentSpan,
        success: bool,
    ) -> Vec<Wakeup> {
        self.vector.write_complete(alt_key, vc, buffer, success)
    }

    /// Detaches a writer, see [`crate::AltVector::close_writer`].
    ///
    /// A writer that aborted before producing bytes has no alternate
    /// assigned; it still releases the vector-update slot.
    pub fn close_writer(&mut self, alt_key: Option<&CacheKey>, vc: VcId) -> Vec<Wakeup> {
        let mut wakeups = match alt_key {
            Some(key) => self.vector.close_writer(key, vc),
            None => Vec::new(),
        };

        if self.open_writer == Some(vc) {
            self.open_writer = None;
            // these readers will re-run selection against the vector as-is
            wakeups.extend(self.open_waiting.drain(..).map(|reader| Wakeup {
                vc: reader,
                event: Event::WriterUpdatedAltTable,
                cookie: 0,
                buffer: None,
            }));
        }
        wakeups
    }

    /// Stashes unflushable origin bytes on the alternate at `alt_key`.
    pub fn add_side_buffer(&mut self, alt_key: &CacheKey, block: &[u8], position: u64) {
        self.vector.add_side_buffer(alt_key, block, position);
    }

    /// Retrieves side-buffer content from the alternate at `alt_key`.
    #[must_use]
    pub fn get_side_buffer(
        &self,
        alt_key: &CacheKey,
        position: u64,
        length: u64,
    ) -> Option<ContentSpan> {
        self.vector.get_side_buffer(alt_key, position, length)
    }

    /// Uncached hull, see [`crate::AltVector::get_uncached_hull`].
    #[must_use]
    pub fn get_uncached_hull(
        &self,
        alt_key: &CacheKey,
        request: &RangeSpec,
        initial: u64,
    ) -> Option<ByteRange> {
        self.vector.get_uncached_hull(alt_key, request, initial)
    }

    /// Whether the entry can be dropped from the table.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.num_active == 0
            && self.open_writer.is_none()
            && self
                .vector
                .groups()
                .iter()
                .all(|g| g.slices().iter().all(|s| !s.has_writers()))
    }
}

/// Handle to an open-directory entry.
pub type OpenDirHandle = Arc<Mutex<OpenDirEntry>>;

/// Process-wide table of open-directory entries, sharded by key.
#[derive(Debug)]
pub struct OpenDir {
    shards: Vec<Mutex<HashMap<CacheKey, OpenDirHandle>>>,
}

impl Default for OpenDir {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenDir {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(Mutex::new(HashMap::default()));
        }
        Self { shards }
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<HashMap<CacheKey, OpenDirHandle>> {
        // NOTE: Truncation is okay, only the low bits pick the shard
        #[allow(clippy::cast_possible_truncation)]
        let idx = (key.fold() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Looks up the entry for `key`. Never creates one.
    #[must_use]
    pub fn open_read(&self, key: &CacheKey) -> Option<OpenDirHandle> {
        self.shard(key)
            .lock()
            .expect("lock is poisoned")
            .get(key)
            .cloned()
    }

    /// Looks up or creates the entry for `key`.
    pub fn open_entry(&self, key: &CacheKey, create: bool) -> Option<OpenDirHandle> {
        let mut shard = self.shard(key).lock().expect("lock is poisoned");

        if let Some(handle) = shard.get(key) {
            return Some(handle.clone());
        }
        if !create {
            return None;
        }

        log::trace!("opening directory entry for {key}");
        let handle = Arc::new(Mutex::new(OpenDirEntry::new(*key)));
        shard.insert(*key, handle.clone());
        Some(handle)
    }

    /// Drops the entry for `key` if nothing references it anymore.
    ///
    /// Returns `true` when the entry was removed (or did not exist).
    pub fn close_entry(&self, key: &CacheKey) -> bool {
        let mut shard = self.shard(key).lock().expect("lock is poisoned");

        let Some(handle) = shard.get(key) else {
            return true;
        };

        let Ok(entry) = handle.try_lock() else {
            return false;
        };

        if entry.is_idle() {
            log::trace!("closing directory entry for {key}");
            drop(entry);
            shard.remove(key);
            true
        } else {
            false
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().expect("lock is poisoned").len())
            .sum()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
