// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::key::CacheKey;

/// Location of a fragment on disk, opaque to the core.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DirEntry {
    /// Disk position.
    pub offset: u64,

    /// Approximate stored size.
    pub approx_size: u32,

    /// Key tag for collision filtering.
    pub tag: u16,

    /// Entry is pinned against eviction.
    pub pinned: bool,
}

/// The disk directory: maps fragment keys to disk positions.
///
/// The core treats entries as opaque tokens it passes to [`crate::VolumeIo`].
pub trait Directory {
    /// Looks up the entry for `key`.
    fn probe(&self, key: &CacheKey) -> Option<DirEntry>;

    /// Inserts an entry for `key`.
    fn insert(&mut self, key: &CacheKey, entry: DirEntry);

    /// Replaces the entry for `key` if it still equals `prev`.
    ///
    /// Returns `false` when the entry changed underneath the caller.
    fn overwrite(&mut self, key: &CacheKey, entry: DirEntry, prev: &DirEntry) -> bool;

    /// Removes the entry for `key`.
    ///
    /// Returns `false` when no entry existed; a race with another remover
    /// is not an error.
    fn delete(&mut self, key: &CacheKey) -> bool;
}
