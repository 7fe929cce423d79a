// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    alternate::Alternate,
    error::Error,
    event::Wakeup,
    key::{CacheKey, VcId},
    open_dir::{OpenDir, OpenDirHandle},
    side_buffer::ContentSpan,
};

/// The write side of one cache transaction.
///
/// The core does not aggregate payload to disk; a writer's job here is
/// the coordination half: claiming the vector-update slot, installing the
/// alternate, announcing fragment completions so parked readers wake, and
/// stashing side-buffer content. Wake lists returned from these calls are
/// delivered by the caller after the entry lock is released.
pub struct WriteVc {
    id: VcId,
    first_key: CacheKey,
    earliest_key: Option<CacheKey>,
    alt_idx: Option<usize>,
    od: OpenDirHandle,
    closed: bool,
}

impl WriteVc {
    pub(crate) fn new(id: VcId, first_key: CacheKey, od: OpenDirHandle) -> Self {
        Self {
            id,
            first_key,
            earliest_key: None,
            alt_idx: None,
            od,
            closed: false,
        }
    }

    /// This VC's id.
    #[must_use]
    pub fn id(&self) -> VcId {
        self.id
    }

    /// The object key being written.
    #[must_use]
    pub fn first_key(&self) -> CacheKey {
        self.first_key
    }

    /// Earliest-fragment key of the installed alternate.
    #[must_use]
    pub fn earliest_key(&self) -> Option<CacheKey> {
        self.earliest_key
    }

    /// Vector index of the installed alternate.
    #[must_use]
    pub fn alt_idx(&self) -> Option<usize> {
        self.alt_idx
    }

    /// Handle to the open-directory entry.
    #[must_use]
    pub fn open_dir_handle(&self) -> OpenDirHandle {
        self.od.clone()
    }

    /// Claims the vector-update slot.
    ///
    /// Readers arriving while the slot is held park until
    /// [`Self::install_alternate`] publishes. Fails with
    /// [`Error::DocBusy`] while another writer holds the slot.
    pub fn begin_vector_update(&self) -> crate::Result<()> {
        let mut ode = self.od.lock().expect("lock is poisoned");
        if ode.set_open_writer(self.id) {
            Ok(())
        } else {
            Err(Error::DocBusy)
        }
    }

    /// Installs `alternate` into the vector and publishes the update.
    ///
    /// `replace` pushes a fresh slice onto an existing group (the
    /// stale-while-update path); `None` appends a new alternate. The
    /// writer announces it will produce `remnant` bytes from offset 0.
    /// Returns the readers to wake, each carrying the folded earliest key
    /// as re-binding cookie.
    pub fn install_alternate(
        &mut self,
        alternate: Alternate,
        replace: Option<usize>,
        remnant: u64,
    ) -> Vec<Wakeup> {
        let earliest = alternate.earliest_key();

        let mut ode = self.od.lock().expect("lock is poisoned");
        let idx = ode.vector.insert(alternate, replace);
        ode.vector
            .slice_mut(idx)
            .expect("slice was just installed")
            .attach_writer(self.id, 0, remnant);

        self.alt_idx = Some(idx);
        self.earliest_key = Some(earliest);

        log::debug!(
            "writer {} installed alternate {earliest} at index {idx}",
            self.id
        );
        ode.publish_vector_update(self.id, &earliest)
    }

    /// Records an issued fragment write at `offset`.
    pub fn write_active(&self, offset: u64) {
        if let Some(earliest) = self.earliest_key {
            let mut ode = self.od.lock().expect("lock is poisoned");
            ode.vector.write_active(&earliest, self.id, offset);
        }
    }

    /// Completes a fragment write and collects the readers to wake.
    ///
    /// The produced bytes ride on the wake-ups so a waiter ships without
    /// re-reading from disk.
    #[must_use]
    pub fn write_complete(&self, buffer: &ContentSpan, success: bool) -> Vec<Wakeup> {
        let Some(earliest) = self.earliest_key else {
            return Vec::new();
        };
        let mut ode = self.od.lock().expect("lock is poisoned");
        ode.write_complete(&earliest, self.id, buffer, success)
    }

    /// Stashes origin bytes that missed a fragment boundary.
    pub fn add_side_buffer(&self, block: &[u8], position: u64) {
        if let Some(earliest) = self.earliest_key {
            let mut ode = self.od.lock().expect("lock is poisoned");
            ode.add_side_buffer(&earliest, block, position);
        }
    }

    /// Detaches from the entry and collects the readers to wake.
    ///
    /// When this was the last writer of its slice, remaining waiters get
    /// the writer-gone wake so they re-read or fail instead of hanging.
    pub fn close(&mut self, table: &OpenDir) -> Vec<Wakeup> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;

        let wakeups = {
            let mut ode = self.od.lock().expect("lock is poisoned");
            let wakeups = ode.close_writer(self.earliest_key.as_ref(), self.id);
            ode.num_active = ode.num_active.saturating_sub(1);
            wakeups
        };

        table.close_entry(&self.first_key);
        wakeups
    }
}

impl Drop for WriteVc {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!("writer {} dropped without close", self.id);
        }
    }
}
