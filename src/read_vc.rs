// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    alternate::Alternate,
    coding::{Decode, Encode},
    directory::{DirEntry, Directory},
    doc::{Doc, DocMagic},
    error::Error,
    event::{Event, COOKIE_WRITER_GONE},
    headers::HttpHeader,
    key::{CacheKey, VcId},
    open_dir::{OpenDir, OpenDirHandle},
    range::{RangeSpec, ResponseRange},
    select::AltSelect,
    side_buffer::ContentSpan,
    vector::SliceRef,
    volume::VolumeIo,
};
use std::sync::Arc;

/// Collaborators a state-machine step may touch.
pub struct CacheCtx<'a> {
    /// The disk directory.
    pub directory: &'a mut dyn Directory,

    /// Volume I/O.
    pub volume: &'a mut dyn VolumeIo,

    /// The open-directory table.
    pub open_dir: &'a OpenDir,

    /// Alternate selection.
    pub select: &'a dyn AltSelect,

    /// Entropy for range boundaries.
    pub rng: &'a mut dyn rand::RngCore,
}

/// Data riding along with a delivered event.
#[derive(Debug, Default)]
pub enum EventData {
    /// Nothing attached.
    #[default]
    None,

    /// A completed disk read.
    Block(crate::Result<Arc<[u8]>>),

    /// A wake-up from writer bookkeeping.
    Wake {
        /// Correlation cookie.
        cookie: u64,

        /// Fragment bytes handed over by a completing writer.
        buffer: Option<ContentSpan>,
    },
}

/// Effect of one state-machine step, consumed by the driver.
#[derive(Debug)]
pub enum ReadStep {
    /// A lock was unavailable; re-enter after
    /// [`crate::RETRY_PERIOD`].
    Retry,

    /// A disk read was submitted; re-enter with the completed block.
    Read {
        /// Fragment key being read.
        key: CacheKey,

        /// Where the block lives.
        entry: DirEntry,
    },

    /// Parked; a wake-up re-enters the machine.
    Wait,

    /// The given event was signaled to the client continuation.
    Signal(Event),

    /// Failure was signaled to the client continuation.
    Fail(Error),

    /// The VC was torn down.
    Closed,
}

/// Consumer-side transfer bookkeeping.
#[derive(Clone, Copy, Debug, Default)]
pub struct Vio {
    /// Bytes delivered so far (part headers included).
    pub ndone: u64,

    /// Total bytes to deliver.
    pub nbytes: u64,

    /// Stop producing while the output backlog exceeds this.
    pub high_water: u64,
}

impl Vio {
    /// Bytes still to deliver.
    #[must_use]
    pub fn ntodo(&self) -> u64 {
        self.nbytes.saturating_sub(self.ndone)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ReadState {
    /// First I/O on the object header.
    StartHead,

    /// A concurrent writer exists; attach to it.
    FromWriter,

    /// Blocked on a writer's alternate-vector update.
    WaitAltUpdate,

    /// Reading the earliest fragment from disk.
    StartEarliest,

    /// Earliest fragment not yet cached; waiting on a writer.
    WaitEarliest,

    /// Rewriting the alternate vector around a dead alternate.
    VecWrite,

    /// Main service loop: pick the next byte span to ship.
    Main,

    /// Disk read for a specific fragment completed.
    ReadDone,

    /// Tearing down.
    Close,

    /// Gone.
    Done,
}

/// The read side of one cache transaction, driven by events.
///
/// Each step returns an explicit [`ReadStep`] effect instead of calling
/// back into the scheduler, so the driver stays in control of I/O and
/// re-entry.
pub struct ReadVc {
    id: VcId,
    state: ReadState,
    cancelled: bool,

    request: HttpHeader,

    first_key: CacheKey,
    key: CacheKey,
    earliest_key: CacheKey,

    od: Option<OpenDirHandle>,
    od_registered: bool,
    slice_ref: Option<SliceRef>,
    alternate: Option<Alternate>,

    /// Vector unmarshaled from the head block, kept for vector repair.
    vector: Option<crate::vector::AltVector>,

    doc_len: u64,
    fragment: u32,

    resp_range: ResponseRange,
    wait_buffer: Option<ContentSpan>,
    vio: Vio,
    out: Vec<u8>,

    /// Paired write VC, when opened from a writer.
    write_vc: Option<VcId>,
    write_vc_earliest: Option<CacheKey>,

    first_dir: Option<DirEntry>,
    earliest_dir: Option<DirEntry>,
    dir: Option<DirEntry>,

    single_fragment: bool,
    read_from_writer_called: bool,
    hit_evacuate: bool,
    begun_read: bool,
    final_boundary_written: bool,
    retried_collision: bool,

    /// Cookie of a vector-update wake that hit a lock retry.
    pending_cookie: Option<u64>,
}

impl ReadVc {
    pub(crate) fn new(id: VcId, key: CacheKey, request: HttpHeader) -> Self {
        Self {
            id,
            state: ReadState::StartHead,
            cancelled: false,
            request,
            first_key: key,
            key,
            earliest_key: key,
            od: None,
            od_registered: false,
            slice_ref: None,
            alternate: None,
            vector: None,
            doc_len: 0,
            fragment: 0,
            resp_range: ResponseRange::default(),
            wait_buffer: None,
            vio: Vio::default(),
            out: Vec::new(),
            write_vc: None,
            write_vc_earliest: None,
            first_dir: None,
            earliest_dir: None,
            dir: None,
            single_fragment: false,
            read_from_writer_called: false,
            hit_evacuate: false,
            begun_read: false,
            final_boundary_written: false,
            retried_collision: false,
            pending_cookie: None,
        }
    }

    pub(crate) fn pair_with_writer(
        &mut self,
        writer: VcId,
        earliest: CacheKey,
        od: OpenDirHandle,
    ) {
        self.write_vc = Some(writer);
        self.write_vc_earliest = Some(earliest);
        self.od = Some(od);
        self.state = ReadState::FromWriter;
    }

    /// This VC's id.
    #[must_use]
    pub fn id(&self) -> VcId {
        self.id
    }

    /// The object key the read was opened for.
    #[must_use]
    pub fn first_key(&self) -> CacheKey {
        self.first_key
    }

    /// Earliest-fragment key of the selected alternate.
    #[must_use]
    pub fn earliest_key(&self) -> CacheKey {
        self.earliest_key
    }

    /// The selected alternate, once open completed.
    #[must_use]
    pub fn alternate(&self) -> Option<&Alternate> {
        self.alternate.as_ref()
    }

    /// Range bookkeeping for the response.
    #[must_use]
    pub fn resp_range(&self) -> &ResponseRange {
        &self.resp_range
    }

    pub(crate) fn resp_range_mut(&mut self) -> &mut ResponseRange {
        &mut self.resp_range
    }

    /// Transfer bookkeeping.
    #[must_use]
    pub fn vio(&self) -> Vio {
        self.vio
    }

    /// The boundary string of a multipart response.
    #[must_use]
    pub fn range_boundary(&self) -> Option<&str> {
        self.resp_range
            .is_multi()
            .then(|| self.resp_range.boundary_str())
    }

    /// Body size the client should announce: the range-adjusted length
    /// for range responses, the object size otherwise.
    #[must_use]
    pub fn effective_content_size(&self) -> u64 {
        if self.resp_range.has_ranges() {
            self.resp_range.calc_content_length()
        } else {
            self.doc_len
        }
    }

    /// Starts the body transfer after open completed.
    pub fn start_read(&mut self, nbytes: u64, high_water: u64) {
        self.vio = Vio {
            ndone: 0,
            nbytes,
            high_water,
        };
    }

    /// Takes the bytes produced so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }

    /// Flags the VC for teardown at its next step.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Runs one state-machine step.
    pub fn handle(&mut self, event: Event, data: EventData, ctx: &mut CacheCtx<'_>) -> ReadStep {
        if self.cancelled && self.state != ReadState::Done {
            self.state = ReadState::Close;
        }

        match self.state {
            ReadState::StartHead => self.start_head(event, data, ctx),
            ReadState::FromWriter => self.from_writer(event, data, ctx),
            ReadState::WaitAltUpdate => self.wait_alt_update(event, data, ctx),
            ReadState::StartEarliest => self.start_earliest(event, data, ctx),
            ReadState::WaitEarliest => self.wait_earliest(event, data, ctx),
            ReadState::VecWrite => self.vec_write(ctx),
            ReadState::Main => self.main(event, data, ctx),
            ReadState::ReadDone => self.read_done(event, data, ctx),
            ReadState::Close => self.do_close(ctx),
            ReadState::Done => ReadStep::Closed,
        }
    }

    /// Explicit close from the consumer.
    pub fn close(&mut self, ctx: &mut CacheCtx<'_>) -> ReadStep {
        self.state = ReadState::Close;
        self.do_close(ctx)
    }

    fn fail(&mut self, ctx: &mut CacheCtx<'_>, error: Error) -> ReadStep {
        log::debug!("read {} for {} failed: {error}", self.id, self.first_key);
        self.release(ctx);
        self.state = ReadState::Done;
        ReadStep::Fail(error)
    }

    fn release(&mut self, ctx: &mut CacheCtx<'_>) {
        if self.begun_read {
            ctx.volume.close_read(self.id);
            self.begun_read = false;
        }

        if let Some(od) = self.od.take() {
            if let Ok(mut ode) = od.lock() {
                if self.od_registered {
                    ode.num_active = ode.num_active.saturating_sub(1);
                    self.od_registered = false;
                }
                ode.remove_open_waiter(self.id);
                let id = self.id;
                ode.vector.for_each_slice(|slice| slice.remove_waiter(id));
                let key = ode.first_key;
                drop(ode);
                ctx.open_dir.close_entry(&key);
            }
        }
    }

    fn do_close(&mut self, ctx: &mut CacheCtx<'_>) -> ReadStep {
        if self.hit_evacuate {
            if let Some(first) = self.first_dir {
                ctx.volume.force_evacuate_head(&first, first.pinned);
                if !self.single_fragment {
                    if let Some(earliest) = self.earliest_dir {
                        ctx.volume.force_evacuate_head(&earliest, earliest.pinned);
                    }
                }
            }
        }

        self.release(ctx);
        self.state = ReadState::Done;
        ReadStep::Closed
    }

    // --- open: head block ------------------------------------------------

    fn start_head(&mut self, _event: Event, data: EventData, ctx: &mut CacheCtx<'_>) -> ReadStep {
        let EventData::Block(io) = data else {
            return self.submit_head_read(ctx);
        };

        let block = match io {
            Ok(block) => block,
            Err(_) => return self.fail(ctx, Error::NoDoc),
        };

        let doc = match Doc::decode_from(&mut &block[..]) {
            Ok(doc) if doc.magic == DocMagic::Alive => doc,
            Ok(_) => {
                log::warn!("head: doc checksum does not match for {}", self.key);
                ctx.directory.delete(&self.key);
                return self.submit_head_read(ctx);
            }
            Err(_) => {
                log::warn!("head: doc magic does not match for {}", self.key);
                ctx.directory.delete(&self.key);
                return self.submit_head_read(ctx);
            }
        };

        if doc.first_key != self.key {
            // directory hash collision with another object
            return self.fail(ctx, Error::NoDoc);
        }

        self.earliest_dir = self.dir;

        if doc.hlen() == 0 {
            return self.fail(ctx, Error::NoDoc);
        }

        let vector = match crate::vector::AltVector::unmarshal(&doc.hdr) {
            Ok(vector) => vector,
            Err(_) => {
                log::warn!(
                    "head failed for {}: vector inconsistency, {} header bytes",
                    self.key,
                    doc.hlen()
                );
                ctx.directory.delete(&self.key);
                return self.fail(ctx, Error::BadMetaData);
            }
        };

        // A retry from a paired writer skips selection and takes the
        // alternate the writer produced.
        let idx = match self.write_vc_earliest {
            Some(earliest) => vector.index_of(&earliest),
            None => ctx.select.select(&vector, &self.request),
        };
        let Some(idx) = idx else {
            return self.fail(ctx, Error::AltMiss);
        };

        let alternate = vector.get(idx).expect("selected index exists").clone();
        self.vector = Some(vector);
        if let Err(error) = self.adopt_alternate(alternate, ctx) {
            return self.fail(ctx, error);
        }

        if doc.key == self.key {
            // resident alternate: this block already holds the content
            self.single_fragment = true;
            debug_assert!(doc.single_fragment);
            self.wait_buffer = Some(ContentSpan::new(0, doc.data.clone()));
            self.key = self.key.next();
            self.fragment = 1;
            self.begin_disk_read(ctx);
            self.state = ReadState::Main;
            return ReadStep::Signal(Event::OpenRead);
        }

        self.state = ReadState::StartEarliest;
        self.key = self.earliest_key;
        self.submit_earliest_read(ctx)
    }

    fn submit_head_read(&mut self, ctx: &mut CacheCtx<'_>) -> ReadStep {
        // a live open-directory entry means there is, or recently was,
        // a writer to attach to
        if !self.read_from_writer_called {
            if let Some(od) = ctx.open_dir.open_read(&self.first_key) {
                self.od = Some(od);
                self.state = ReadState::FromWriter;
                return self.from_writer(Event::Immediate, EventData::None, ctx);
            }
        }

        match ctx.directory.probe(&self.key) {
            Some(entry) => {
                self.dir = Some(entry);
                if self.first_dir.is_none() {
                    self.first_dir = Some(entry);
                }
                ReadStep::Read {
                    key: self.key,
                    entry,
                }
            }
            None => self.fail(ctx, Error::NoDoc),
        }
    }

    fn adopt_alternate(
        &mut self,
        alternate: Alternate,
        ctx: &mut CacheCtx<'_>,
    ) -> crate::Result<()> {
        self.earliest_key = alternate.earliest_key();
        self.key = self.earliest_key;
        self.doc_len = alternate.object_size();

        // With a known length the ranges can be checked right away;
        // otherwise they stay vague until the origin supplies the length.
        let resolved = if alternate.content_length_known() {
            self.resp_range.resolve(Some(self.doc_len))
        } else {
            self.resp_range.resolve(None)
        };
        if !resolved {
            return Err(Error::UnsatisfiableRange);
        }

        if self.resp_range.is_multi() {
            self.resp_range.set_content_type_from(&alternate.response);
            self.resp_range
                .generate_boundary(&self.earliest_key, &mut ctx.rng);
        }

        self.alternate = Some(alternate);
        Ok(())
    }

    fn begin_disk_read(&mut self, ctx: &mut CacheCtx<'_>) {
        if !self.begun_read {
            ctx.volume.begin_read(self.id);
            self.begun_read = true;
        }
        if let Some(entry) = self.dir {
            if ctx.volume.within_hit_evacuate_window(&entry) {
                self.hit_evacuate = true;
            }
        }
    }

    // --- open: attach to a writer ----------------------------------------

    // A wake-up lands here when the writer published or left; both cases
    // are handled by re-running the attach logic.
    fn from_writer(&mut self, _event: Event, _data: EventData, ctx: &mut CacheCtx<'_>) -> ReadStep {
        self.read_from_writer_called = true;

        let Some(od) = self.od.clone().or_else(|| {
            ctx.open_dir.open_read(&self.first_key)
        }) else {
            // writer gone before we attached; serve from disk
            self.write_vc = None;
            self.state = ReadState::StartHead;
            return self.submit_head_read(ctx);
        };
        self.od = Some(od.clone());

        let Ok(mut ode) = od.try_lock() else {
            return ReadStep::Retry;
        };

        if !self.od_registered {
            ode.num_active += 1;
            self.od_registered = true;
        }

        if ode.open_writer().is_some() {
            // alternates are in flux; wait for the update to publish
            if ode.open_writer() == self.write_vc {
                self.state = ReadState::WaitAltUpdate;
            }
            ode.reader_wait_open(self.id);
            log::debug!("read {} waiting for vector update", self.id);
            return ReadStep::Wait;
        }

        if let Some(earliest) = self.write_vc_earliest {
            if let Some(slice_ref) = ode.vector.slice_ref_for(&earliest) {
                let alternate = ode
                    .vector
                    .resolve(&slice_ref)
                    .expect("reference just taken")
                    .alternate
                    .clone();
                self.slice_ref = Some(slice_ref);
                drop(ode);

                if let Err(error) = self.adopt_alternate(alternate, ctx) {
                    return self.fail(ctx, error);
                }
                self.state = ReadState::StartEarliest;
                return self.submit_earliest_read(ctx);
            }
        }

        // no paired alternate: select independently, then read the head
        // block from disk like any other hit
        let miss = ctx.select.select(&ode.vector, &self.request).is_none()
            && !ode.vector.is_empty();
        drop(ode);
        if miss {
            return self.fail(ctx, Error::AltMiss);
        }

        self.state = ReadState::StartHead;
        self.key = self.first_key;
        match ctx.directory.probe(&self.key) {
            Some(entry) => {
                self.dir = Some(entry);
                if self.first_dir.is_none() {
                    self.first_dir = Some(entry);
                }
                ReadStep::Read {
                    key: self.key,
                    entry,
                }
            }
            None => self.fail(ctx, Error::NoDoc),
        }
    }

    fn wait_alt_update(
        &mut self,
        _event: Event,
        data: EventData,
        ctx: &mut CacheCtx<'_>,
    ) -> ReadStep {
        // the cookie must survive a lock retry
        let cookie = match data {
            EventData::Wake { cookie, .. } => {
                self.pending_cookie = Some(cookie);
                cookie
            }
            _ => match self.pending_cookie {
                Some(cookie) => cookie,
                None => return ReadStep::Wait,
            },
        };

        let od = self.od.clone().expect("attached to a writer");
        let Ok(ode) = od.try_lock() else {
            return ReadStep::Retry;
        };
        self.pending_cookie = None;

        // the cookie is the folded earliest key of the alternate the
        // paired writer chose
        let mut adopted = None;
        for (idx, group) in ode.vector.groups().iter().enumerate() {
            let slice = group.head();
            if slice.alternate.earliest_key().fold() == cookie {
                adopted = Some((
                    slice.alternate.clone(),
                    SliceRef {
                        alt_idx: idx,
                        alt_id: slice.alt_id,
                        generation: slice.generation,
                    },
                ));
                break;
            }
        }
        drop(ode);

        let Some((alternate, slice_ref)) = adopted else {
            return self.fail(ctx, Error::AltMiss);
        };

        self.slice_ref = Some(slice_ref);
        if let Err(error) = self.adopt_alternate(alternate, ctx) {
            return self.fail(ctx, error);
        }

        // the writer already produced the earliest fragment; go straight
        // to content service
        self.state = ReadState::Main;
        ReadStep::Signal(Event::OpenRead)
    }

    // --- open: earliest fragment -----------------------------------------

    fn start_earliest(
        &mut self,
        _event: Event,
        data: EventData,
        ctx: &mut CacheCtx<'_>,
    ) -> ReadStep {
        let EventData::Block(io) = data else {
            return self.submit_earliest_read(ctx);
        };

        let block = match io {
            Ok(block) => block,
            Err(_) => return self.fail(ctx, Error::NoDoc),
        };

        let doc = match Doc::decode_from(&mut &block[..]) {
            Ok(doc) if doc.magic == DocMagic::Alive => doc,
            Ok(_) | Err(_) => {
                log::warn!("earliest: doc magic does not match for {}", self.key);
                ctx.directory.delete(&self.key);
                self.earliest_dir = None;
                return self.submit_earliest_read(ctx);
            }
        };

        if doc.key != self.key {
            // collision, look again, once
            if self.retried_collision {
                return self.fail(ctx, Error::Corrupt);
            }
            self.retried_collision = true;
            self.earliest_dir = None;
            return self.submit_earliest_read(ctx);
        }

        self.retried_collision = false;
        self.earliest_key = self.key;
        self.wait_buffer = Some(ContentSpan::new(0, doc.data.clone()));
        self.key = doc.key.next();
        self.fragment = 1;
        self.begin_disk_read(ctx);

        self.state = ReadState::Main;
        ReadStep::Signal(Event::OpenRead)
    }

    fn submit_earliest_read(&mut self, ctx: &mut CacheCtx<'_>) -> ReadStep {
        if let Some(entry) = ctx.directory.probe(&self.key) {
            self.earliest_dir = Some(entry);
            self.dir = Some(entry);
            self.state = ReadState::StartEarliest;
            return ReadStep::Read {
                key: self.key,
                entry,
            };
        }

        // the alternate's earliest fragment is not on disk
        let Some(od) = self.od.clone() else {
            return self.fail(ctx, Error::NoDoc);
        };
        let Ok(mut ode) = od.try_lock() else {
            self.state = ReadState::StartEarliest;
            return ReadStep::Retry;
        };

        if ode.has_writer(&self.earliest_key) {
            // a writer will produce it; the client must still learn the
            // read side is open or it never sets up its transfer
            ode.wait_for(&self.earliest_key, self.id, 0);
            drop(ode);
            self.state = ReadState::WaitEarliest;
            return ReadStep::Signal(Event::OpenRead);
        }
        drop(ode);

        // dead alternate: rewrite the vector without it
        self.state = ReadState::VecWrite;
        self.vec_write(ctx)
    }

    fn wait_earliest(
        &mut self,
        _event: Event,
        _data: EventData,
        ctx: &mut CacheCtx<'_>,
    ) -> ReadStep {
        if let Some(entry) = ctx.directory.probe(&self.key) {
            self.earliest_dir = Some(entry);
            self.dir = Some(entry);
            self.state = ReadState::StartEarliest;
            return ReadStep::Read {
                key: self.key,
                entry,
            };
        }

        // not on disk yet; park again while a writer remains
        let od = self.od.clone().expect("waiting requires an entry");
        let Ok(mut ode) = od.try_lock() else {
            return ReadStep::Retry;
        };
        if ode.wait_for(&self.earliest_key, self.id, 0) {
            ReadStep::Wait
        } else {
            // Writer is gone, so no more data to wait for. Start over from
            // the head block; most likely the object turned out to be a
            // resident alternate with no separate earliest fragment.
            drop(ode);
            self.state = ReadState::StartHead;
            self.key = self.first_key;
            self.submit_head_read(ctx)
        }
    }

    // --- open: vector rewrite around a dead alternate ---------------------

    fn vec_write(&mut self, ctx: &mut CacheCtx<'_>) -> ReadStep {
        let Some(od) = self.od.clone() else {
            return self.fail(ctx, Error::NoDoc);
        };
        let Ok(mut ode) = od.try_lock() else {
            return ReadStep::Retry;
        };

        ode.writing_vec = true;

        // this entry may never have seen the on-disk vector
        if ode.vector.is_empty() {
            if let Some(vector) = self.vector.take() {
                ode.vector = vector;
            }
        }

        if let Some(idx) = ode.vector.index_of(&self.earliest_key) {
            ode.vector.remove(idx);
        }

        if ode.vector.is_empty() {
            ctx.directory.delete(&self.first_key);
            ode.writing_vec = false;
            drop(ode);
            return self.fail(ctx, Error::NoDoc);
        }

        let Ok(hdr) = ode.vector.encode_into_vec() else {
            ode.writing_vec = false;
            drop(ode);
            return self.fail(ctx, Error::BadMetaData);
        };

        let doc = Doc::new(self.first_key, self.first_key, hdr, Vec::new().into());
        let Ok(block) = doc.encode_into_vec() else {
            ode.writing_vec = false;
            drop(ode);
            return self.fail(ctx, Error::BadMetaData);
        };

        match ctx.volume.rewrite_vector(&self.first_key, &block) {
            Ok(entry) => {
                let prev = ode.first_dir.take();
                match prev {
                    Some(prev) if ctx.directory.overwrite(&self.first_key, entry, &prev) => {}
                    _ => ctx.directory.insert(&self.first_key, entry),
                }
                ode.first_dir = Some(entry);

                if ode.move_resident_alt {
                    if let (Some(key), Some(dir)) = (ode.single_doc_key, ode.single_doc_dir) {
                        ctx.directory.insert(&key, dir);
                    }
                    ode.move_resident_alt = false;
                }
                ode.writing_vec = false;

                let selected = ctx.select.select(&ode.vector, &self.request).is_some();
                drop(ode);

                if selected {
                    // restart from the head with the repaired vector
                    self.state = ReadState::StartHead;
                    self.key = self.first_key;
                    self.first_dir = Some(entry);
                    self.dir = Some(entry);
                    ReadStep::Read {
                        key: self.key,
                        entry,
                    }
                } else {
                    self.fail(ctx, Error::AltMiss)
                }
            }
            Err(_) => {
                ode.writing_vec = false;
                drop(ode);
                self.fail(ctx, Error::AltMiss)
            }
        }
    }

    // --- body service ------------------------------------------------------

    fn main(&mut self, _event: Event, data: EventData, ctx: &mut CacheCtx<'_>) -> ReadStep {
        if let EventData::Wake { cookie, buffer } = data {
            if let Some(span) = buffer {
                self.wait_buffer = Some(span);
            } else if cookie == COOKIE_WRITER_GONE {
                log::debug!("read {}: writer gone, retrying from cache", self.id);
            }
        }

        if self.wait_buffer.is_some() {
            return self.ship_content(ctx);
        }

        let target_position = self.resp_range.offset();
        let target_size = self.resp_range.remnant_size();

        if target_size == 0 {
            if self.vio.ntodo() > 0 {
                return self.signal_terminal(Event::Eos);
            }
            return self.signal_terminal(Event::ReadComplete);
        }

        // refresh the alternate view so fragments a writer completed since
        // the last pass are visible
        if let Some(od) = self.od.clone() {
            let Ok(mut ode) = od.try_lock() else {
                return ReadStep::Retry;
            };

            let slice_ref = self
                .slice_ref
                .filter(|r| ode.vector.resolve(r).is_some())
                .or_else(|| ode.vector.slice_ref_for(&self.earliest_key));

            if let Some(slice_ref) = slice_ref {
                self.slice_ref = Some(slice_ref);
                let slice = ode
                    .vector
                    .resolve(&slice_ref)
                    .expect("reference just checked");
                self.alternate = Some(slice.alternate.clone());
            }

            let Some(alternate) = self.alternate.clone() else {
                drop(ode);
                return self.fail(ctx, Error::NoDoc);
            };

            self.fragment = alternate.frag_index_of(target_position);

            if alternate.is_frag_cached(self.fragment) {
                self.key = alternate.frag_key(self.fragment);
                drop(ode);
                return self.fetch_from_cache(ctx);
            }

            let fragment_length = alternate.clip_to_frag_boundary(target_position, target_size);
            if let Some(span) =
                ode.get_side_buffer(&self.earliest_key, target_position, fragment_length)
            {
                drop(ode);
                self.wait_buffer = Some(span);
                return self.ship_content(ctx);
            }

            if !ode.wait_for(&self.earliest_key, self.id, target_position) {
                drop(ode);
                log::debug!(
                    "read {}: uncached fragment {} and no writer",
                    self.id,
                    self.fragment
                );
                return self.fail(ctx, Error::WriterGone);
            }

            log::trace!(
                "read {} waiting on fragment {} at {}",
                self.id,
                self.fragment,
                target_position
            );
            return ReadStep::Wait;
        }

        // no open-directory entry: plain disk service
        let Some(alternate) = self.alternate.clone() else {
            return self.fail(ctx, Error::NoDoc);
        };
        self.fragment = alternate.frag_index_of(target_position);

        if alternate.is_frag_cached(self.fragment) {
            self.key = alternate.frag_key(self.fragment);
            return self.fetch_from_cache(ctx);
        }

        log::warn!(
            "read {}: uncached fragment {} at {} and no writers",
            self.id,
            self.fragment,
            target_position
        );
        self.fail(ctx, Error::Truncated)
    }

    fn fetch_from_cache(&mut self, ctx: &mut CacheCtx<'_>) -> ReadStep {
        match ctx.directory.probe(&self.key) {
            Some(entry) => {
                self.dir = Some(entry);
                self.retried_collision = false;
                self.state = ReadState::ReadDone;
                ReadStep::Read {
                    key: self.key,
                    entry,
                }
            }
            None => {
                log::warn!(
                    "object {} truncated at {} of {}, missing fragment {}",
                    self.first_key,
                    self.vio.ndone,
                    self.doc_len,
                    self.key
                );
                ctx.directory.delete(&self.earliest_key);
                self.fail(ctx, Error::Truncated)
            }
        }
    }

    fn read_done(&mut self, _event: Event, data: EventData, ctx: &mut CacheCtx<'_>) -> ReadStep {
        let EventData::Block(io) = data else {
            // a stray immediate wake while the read is in flight
            return ReadStep::Wait;
        };

        let block = match io {
            Ok(block) => block,
            Err(_) => {
                ctx.directory.delete(&self.earliest_key);
                return self.fail(ctx, Error::Truncated);
            }
        };

        let doc = match Doc::decode_from(&mut &block[..]) {
            Ok(doc) if doc.magic == DocMagic::Alive => doc,
            Ok(_) => {
                log::warn!("middle: doc checksum does not match for {}", self.key);
                return self.fail(ctx, Error::Corrupt);
            }
            Err(_) => {
                log::warn!("middle: doc magic does not match for {}", self.key);
                return self.fail(ctx, Error::Corrupt);
            }
        };

        if doc.key != self.key {
            // collision: probe again, once
            if self.retried_collision {
                return self.fail(ctx, Error::Corrupt);
            }
            self.retried_collision = true;
            return match ctx.directory.probe(&self.key) {
                Some(entry) => {
                    self.dir = Some(entry);
                    ReadStep::Read {
                        key: self.key,
                        entry,
                    }
                }
                None => {
                    ctx.directory.delete(&self.earliest_key);
                    self.fail(ctx, Error::Truncated)
                }
            };
        }

        let position = self
            .alternate
            .as_ref()
            .map_or(0, |alt| alt.frag_offset(self.fragment));
        self.wait_buffer = Some(ContentSpan::new(position, doc.data.clone()));

        self.state = ReadState::Main;
        self.main(Event::Immediate, EventData::None, ctx)
    }

    fn ship_content(&mut self, ctx: &mut CacheCtx<'_>) -> ReadStep {
        let Some(span) = self.wait_buffer.take() else {
            self.state = ReadState::Main;
            return self.main(Event::Immediate, EventData::None, ctx);
        };

        // don't overfill the consumer while it lags behind
        if self.vio.ndone > 0 && self.out.len() as u64 >= self.vio.high_water {
            self.wait_buffer = Some(span);
            return ReadStep::Wait;
        }

        let r_pos = self.resp_range.offset();
        let mut bytes = span
            .len()
            .min(self.vio.ntodo())
            .min(self.resp_range.remnant_size());

        if r_pos < span.position || r_pos - span.position >= span.len() {
            // the handed-over bytes do not cover the current position;
            // drop them and look again
            log::debug!(
                "read {}: content at {} does not cover position {}",
                self.id,
                span.position,
                r_pos
            );
            self.state = ReadState::Main;
            return self.main(Event::Immediate, EventData::None, ctx);
        }

        // a pending range shift means the previous range was filled; the
        // part header goes out before this range's bytes
        if self.resp_range.has_pending_range_shift() {
            let idx = self.resp_range.idx().expect("multi range is positioned");
            let part = self.resp_range.get(idx);
            let written = RangeSpec::write_part_boundary(
                &mut self.out,
                self.resp_range.boundary_str(),
                self.doc_len,
                part.min,
                part.max,
                self.resp_range.content_type(),
            );
            self.vio.ndone += written;
            self.resp_range.consume_range_shift();
        }

        let skip = (r_pos - span.position) as usize;
        // NOTE: Truncation is okay, a fragment always fits in memory
        #[allow(clippy::cast_possible_truncation)]
        let take = bytes.min(span.len() - skip as u64) as usize;
        bytes = take as u64;

        self.out.extend_from_slice(&span.data[skip..skip + take]);
        self.resp_range.consume(bytes);
        self.vio.ndone += bytes;

        log::trace!("read {} shipped {bytes} bytes at {r_pos}", self.id);

        // keep the block while it still covers the next position, e.g.
        // the next range of a multipart response in the same fragment
        if self.vio.ntodo() > 0 {
            let next = self.resp_range.offset();
            if next > r_pos && span.position <= next && next < span.end() {
                self.wait_buffer = Some(span);
            }
        }

        if self.resp_range.is_multi()
            && self.resp_range.is_exhausted()
            && !self.final_boundary_written
        {
            let written =
                RangeSpec::write_final_boundary(&mut self.out, self.resp_range.boundary_str());
            self.vio.ndone += written;
            self.final_boundary_written = true;
        }

        self.state = ReadState::Main;
        if self.vio.ntodo() == 0 {
            self.signal_terminal(Event::ReadComplete)
        } else {
            ReadStep::Signal(Event::ReadReady)
        }
    }

    fn signal_terminal(&mut self, event: Event) -> ReadStep {
        self.state = ReadState::Main;
        ReadStep::Signal(event)
    }
}
