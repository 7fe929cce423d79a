// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    error::Error,
    headers::HttpHeader,
    key::{CacheKey, VcIdGenerator},
    open_dir::OpenDir,
    read_vc::ReadVc,
    write_vc::WriteVc,
};

/// Entry points of the cache core.
///
/// Owns the open-directory table and hands out VCs. The returned VCs are
/// event-driven; the caller supplies collaborators through
/// [`crate::CacheCtx`] on every step.
#[derive(Default)]
pub struct Cache {
    open_dir: OpenDir,
    vc_ids: VcIdGenerator,
}

impl Cache {
    /// Creates a cache core with an empty open-directory table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            open_dir: OpenDir::new(),
            vc_ids: VcIdGenerator::new(1),
        }
    }

    /// The open-directory table.
    #[must_use]
    pub fn open_dir(&self) -> &OpenDir {
        &self.open_dir
    }

    /// Opens a read VC for `key`.
    ///
    /// A malformed `Range` field is a range error before any body byte is
    /// produced.
    pub fn open_read(&self, key: &CacheKey, request: &HttpHeader) -> crate::Result<ReadVc> {
        let mut vc = ReadVc::new(self.vc_ids.next(), *key, request.clone());
        if !vc.resp_range_mut().init(request) {
            return Err(Error::UnsatisfiableRange);
        }
        Ok(vc)
    }

    /// Opens a read VC paired with `writer`, to serve the content the
    /// writer is filling.
    pub fn open_read_from_writer(
        &self,
        writer: &WriteVc,
        request: &HttpHeader,
    ) -> crate::Result<ReadVc> {
        let mut vc = ReadVc::new(self.vc_ids.next(), writer.first_key(), request.clone());
        if !vc.resp_range_mut().init(request) {
            return Err(Error::UnsatisfiableRange);
        }

        // Use the writer's earliest key even though a partial fill only
        // pins it down when the alternate is installed; attach re-checks.
        let earliest = writer.earliest_key().unwrap_or_else(|| writer.first_key());
        vc.pair_with_writer(writer.id(), earliest, writer.open_dir_handle());
        Ok(vc)
    }

    /// Opens (or attaches to) the write side for `key`.
    pub fn open_write(&self, key: &CacheKey) -> WriteVc {
        let od = self
            .open_dir
            .open_entry(key, true)
            .expect("entry is created on demand");

        od.lock().expect("lock is poisoned").num_active += 1;
        WriteVc::new(self.vc_ids.next(), *key, od)
    }
}
