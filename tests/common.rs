// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

#![allow(unused)]

use alt_cache::{
    mock::{FirstAlt, MockDirectory, MockVolume},
    Alternate, AltSelect, Cache, CacheCtx, CacheKey, Directory, Doc, Encode, Event, EventData,
    HttpHeader, ReadStep, ReadVc, VolumeIo, Wakeup,
};
use rand::{rngs::StdRng, SeedableRng};

/// Fragment size used by all test objects.
pub const FF: u64 = 8 * 1024;

/// Everything a test drives: the core plus its mock collaborators.
pub struct TestBed {
    pub cache: Cache,
    pub directory: MockDirectory,
    pub volume: MockVolume,
    pub select: Box<dyn AltSelect>,
    pub rng: StdRng,
}

impl Default for TestBed {
    fn default() -> Self {
        Self {
            cache: Cache::new(),
            directory: MockDirectory::default(),
            volume: MockVolume::default(),
            select: Box::new(FirstAlt),
            rng: StdRng::seed_from_u64(0x0ca3),
        }
    }
}

impl TestBed {
    pub fn ctx(&mut self) -> CacheCtx<'_> {
        CacheCtx {
            directory: &mut self.directory,
            volume: &mut self.volume,
            open_dir: self.cache.open_dir(),
            select: &*self.select,
            rng: &mut self.rng,
        }
    }
}

/// Deterministic test body: repeating position-dependent bytes.
pub fn body_of(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn request(url: &str) -> HttpHeader {
    HttpHeader::new(format!("GET {url}"))
}

pub fn request_with_range(url: &str, range: &str) -> HttpHeader {
    let mut req = request(url);
    req.set("Range", range);
    req
}

/// Builds the alternate for a stored test object.
pub fn build_alternate(url: &str, body_len: u64, content_type: Option<&str>) -> Alternate {
    let mut resp = HttpHeader::new("200");
    resp.set("Content-Length", body_len.to_string());
    if let Some(ct) = content_type {
        resp.set("Content-Type", ct);
    }

    let first_key = CacheKey::from_bytes(url.as_bytes());
    Alternate::new(request(url), resp, first_key.next(), FF)
}

/// Writes a complete object into the mock directory and volume.
///
/// Small bodies become a resident (single-fragment) alternate whose head
/// block carries the content; larger ones get a separate earliest block
/// and fragment chain.
pub fn store_object(
    bed: &mut TestBed,
    url: &str,
    body: &[u8],
    content_type: Option<&str>,
) -> CacheKey {
    let first_key = CacheKey::from_bytes(url.as_bytes());
    let mut alt = build_alternate(url, body.len() as u64, content_type);
    let earliest_key = alt.earliest_key();

    let frag_count = body.len().div_ceil(FF as usize).max(1);
    for idx in 0..frag_count {
        alt.mark_frag_write(idx as u32);
    }

    let mut vector = alt_cache::AltVector::new();
    vector.insert(alt.clone(), None);
    let hdr = vector.encode_into_vec().expect("vector encodes");

    if frag_count == 1 {
        // resident alternate: the head block holds the content
        let mut doc = Doc::new(first_key, earliest_key, hdr, body.to_vec().into());
        doc.total_len = body.len() as u64;
        doc.single_fragment = true;
        let entry = bed.volume.store(doc.encode_into_vec().expect("doc encodes"));
        bed.directory.insert(&first_key, entry);
        return first_key;
    }

    // head block: no content of its own
    let mut head = Doc::new(first_key, first_key, hdr, Vec::new().into());
    head.total_len = body.len() as u64;
    let entry = bed.volume.store(head.encode_into_vec().expect("doc encodes"));
    bed.directory.insert(&first_key, entry);

    for idx in 0..frag_count {
        let key = alt.frag_key(idx as u32);
        let start = idx * FF as usize;
        let end = (start + FF as usize).min(body.len());

        let mut doc = Doc::new(first_key, key, Vec::new(), body[start..end].to_vec().into());
        doc.total_len = body.len() as u64;
        let entry = bed.volume.store(doc.encode_into_vec().expect("doc encodes"));
        bed.directory.insert(&key, entry);
    }

    first_key
}

/// Pumps disk reads and lock retries until the VC surfaces an effect.
pub fn pump(vc: &mut ReadVc, bed: &mut TestBed, mut step: ReadStep) -> ReadStep {
    loop {
        match step {
            ReadStep::Read { entry, .. } => {
                let block = VolumeIo::read(&mut bed.volume, &entry);
                let mut ctx = bed.ctx();
                step = vc.handle(Event::AioDone, EventData::Block(block), &mut ctx);
            }
            ReadStep::Retry => {
                let mut ctx = bed.ctx();
                step = vc.handle(Event::Immediate, EventData::None, &mut ctx);
            }
            other => return other,
        }
    }
}

/// Enters the state machine and pumps to the next surfaced effect.
pub fn drive(vc: &mut ReadVc, bed: &mut TestBed) -> ReadStep {
    let step = {
        let mut ctx = bed.ctx();
        vc.handle(Event::Immediate, EventData::None, &mut ctx)
    };
    pump(vc, bed, step)
}

/// Delivers one wake-up and pumps to the next surfaced effect.
pub fn deliver(vc: &mut ReadVc, bed: &mut TestBed, wakeup: Wakeup) -> ReadStep {
    let step = {
        let mut ctx = bed.ctx();
        vc.handle(
            wakeup.event,
            EventData::Wake {
                cookie: wakeup.cookie,
                buffer: wakeup.buffer,
            },
            &mut ctx,
        )
    };
    pump(vc, bed, step)
}

/// Reads the whole body after a successful open.
///
/// Returns the produced bytes and the terminal effect.
pub fn read_full_body(vc: &mut ReadVc, bed: &mut TestBed) -> (Vec<u8>, ReadStep) {
    let total = vc.effective_content_size();
    vc.start_read(total, 1 << 20);

    let mut body = Vec::new();
    loop {
        let step = drive(vc, bed);
        body.append(&mut vc.take_output());

        match step {
            ReadStep::Signal(Event::ReadReady) => {}
            other => return (body, other),
        }
    }
}
