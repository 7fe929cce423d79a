// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    directory::{DirEntry, Directory},
    event::{Scheduler, Wakeup},
    headers::HttpHeader,
    key::{CacheKey, VcId},
    select::AltSelect,
    vector::AltVector,
    volume::VolumeIo,
    HashMap,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Mock in-memory directory
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Default)]
pub struct MockDirectory(Arc<RwLock<HashMap<CacheKey, DirEntry>>>);

impl MockDirectory {
    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.read().expect("lock is poisoned").len()
    }

    /// Whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Directory for MockDirectory {
    fn probe(&self, key: &CacheKey) -> Option<DirEntry> {
        self.0.read().expect("lock is poisoned").get(key).copied()
    }

    fn insert(&mut self, key: &CacheKey, entry: DirEntry) {
        self.0.write().expect("lock is poisoned").insert(*key, entry);
    }

    fn overwrite(&mut self, key: &CacheKey, entry: DirEntry, prev: &DirEntry) -> bool {
        let mut map = self.0.write().expect("lock is poisoned");
        match map.get(key) {
            Some(current) if current == prev => {
                map.insert(*key, entry);
                true
            }
            _ => false,
        }
    }

    fn delete(&mut self, key: &CacheKey) -> bool {
        self.0.write().expect("lock is poisoned").remove(key).is_some()
    }
}

#[derive(Default)]
struct MockVolumeInner {
    blocks: Vec<Arc<[u8]>>,
    evacuated: Vec<DirEntry>,
    active_readers: Vec<VcId>,
}

/// Mock in-memory volume holding raw blocks addressed by offset
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Default)]
pub struct MockVolume(Arc<Mutex<MockVolumeInner>>);

impl MockVolume {
    /// Stores a raw block, returning the directory entry addressing it.
    pub fn store(&self, block: impl Into<Arc<[u8]>>) -> DirEntry {
        let block = block.into();
        let mut inner = self.0.lock().expect("lock is poisoned");

        // NOTE: Truncation is okay, these are test sizes
        #[allow(clippy::cast_possible_truncation)]
        let entry = DirEntry {
            offset: inner.blocks.len() as u64,
            approx_size: block.len() as u32,
            tag: 0,
            pinned: false,
        };
        inner.blocks.push(block);
        entry
    }

    /// Entries passed to `force_evacuate_head` so far.
    #[must_use]
    pub fn evacuated(&self) -> Vec<DirEntry> {
        self.0.lock().expect("lock is poisoned").evacuated.clone()
    }

    /// Readers currently registered.
    #[must_use]
    pub fn active_readers(&self) -> usize {
        self.0.lock().expect("lock is poisoned").active_readers.len()
    }
}

impl VolumeIo for MockVolume {
    fn read(&mut self, entry: &DirEntry) -> crate::Result<Arc<[u8]>> {
        let inner = self.0.lock().expect("lock is poisoned");
        // NOTE: Truncation is okay, these are test sizes
        #[allow(clippy::cast_possible_truncation)]
        let idx = entry.offset as usize;
        inner.blocks.get(idx).cloned().ok_or(crate::Error::NoDoc)
    }

    fn rewrite_vector(&mut self, _key: &CacheKey, block: &[u8]) -> crate::Result<DirEntry> {
        Ok(self.store(block.to_vec()))
    }

    fn begin_read(&mut self, vc: VcId) {
        let mut inner = self.0.lock().expect("lock is poisoned");
        if !inner.active_readers.contains(&vc) {
            inner.active_readers.push(vc);
        }
    }

    fn close_read(&mut self, vc: VcId) {
        self.0
            .lock()
            .expect("lock is poisoned")
            .active_readers
            .retain(|&v| v != vc);
    }

    fn close_write(&mut self, _vc: VcId) {}

    fn force_evacuate_head(&mut self, entry: &DirEntry, _pinned: bool) {
        self.0
            .lock()
            .expect("lock is poisoned")
            .evacuated
            .push(*entry);
    }
}

/// Scheduler that queues everything for the test driver to replay
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Default)]
pub struct MockScheduler(Arc<Mutex<VecDeque<Wakeup>>>);

impl MockScheduler {
    /// Takes the next queued wake-up.
    #[must_use]
    pub fn pop(&self) -> Option<Wakeup> {
        self.0.lock().expect("lock is poisoned").pop_front()
    }

    /// Number of queued wake-ups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().expect("lock is poisoned").len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues a batch of wake-ups, e.g. from writer bookkeeping.
    pub fn enqueue(&self, wakeups: Vec<Wakeup>) {
        self.0
            .lock()
            .expect("lock is poisoned")
            .extend(wakeups);
    }
}

impl Scheduler for MockScheduler {
    fn schedule_in(&self, vc: VcId, _delay: Duration) {
        self.enqueue(vec![Wakeup {
            vc,
            event: crate::Event::Immediate,
            cookie: 0,
            buffer: None,
        }]);
    }

    fn schedule_imm(&self, vc: VcId) {
        self.schedule_in(vc, Duration::ZERO);
    }

    fn wake_up(&self, wakeup: Wakeup) {
        self.enqueue(vec![wakeup]);
    }
}

/// Selector that always takes the first alternate
#[derive(Clone, Copy, Default)]
pub struct FirstAlt;

impl AltSelect for FirstAlt {
    fn select(&self, vector: &AltVector, _request: &HttpHeader) -> Option<usize> {
        (!vector.is_empty()).then_some(0)
    }
}

/// Selector that matches the request's `Accept-Encoding` against the
/// alternates' stored request headers
#[derive(Clone, Copy, Default)]
pub struct EncodingSelect;

impl AltSelect for EncodingSelect {
    fn select(&self, vector: &AltVector, request: &HttpHeader) -> Option<usize> {
        let wanted = request.get("Accept-Encoding").unwrap_or("");
        (0..vector.count()).find(|&idx| {
            vector
                .get(idx)
                .and_then(|alt| alt.request.get("Accept-Encoding"))
                .unwrap_or("")
                == wanted
        })
    }
}
