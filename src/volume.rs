// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{directory::DirEntry, key::CacheKey, key::VcId};
use std::sync::Arc;

/// Disk volume I/O as the core consumes it.
///
/// Submission is non-blocking from the state machine's point of view: the
/// driver performs the call and re-enters the VC with the completion.
pub trait VolumeIo {
    /// Reads the raw block at `entry`.
    fn read(&mut self, entry: &DirEntry) -> crate::Result<Arc<[u8]>>;

    /// Rewrites the object's header block (the marshaled alternate
    /// vector), returning the new directory entry.
    fn rewrite_vector(&mut self, key: &CacheKey, block: &[u8]) -> crate::Result<DirEntry>;

    /// Registers `vc` as an active reader of the volume.
    fn begin_read(&mut self, vc: VcId);

    /// Releases a reader registration.
    fn close_read(&mut self, vc: VcId);

    /// Releases a writer registration.
    fn close_write(&mut self, vc: VcId);

    /// Schedules the block at `entry` for evacuation ahead of the write
    /// cursor so a popular object survives.
    fn force_evacuate_head(&mut self, entry: &DirEntry, pinned: bool);

    /// Whether the block at `entry` sits close enough to the write cursor
    /// that a hit should trigger evacuation.
    fn within_hit_evacuate_window(&self, _entry: &DirEntry) -> bool {
        false
    }
}
