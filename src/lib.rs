// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Metadata and concurrency core of an HTTP object cache.
//!
//! This crate is the coordination layer that sits between the disk layer
//! of a caching proxy and its HTTP front end. It owns:
//!
//! - the **alternate vector** - the per-object collection of response
//!   variants, each a stack of temporally distinct slices so stale
//!   content can be served while an update is written
//! - the **fragment table** - the per-alternate map from byte offsets to
//!   content-addressed fragment keys and cached flags
//! - the **open-directory entry** - the live rendezvous for an active
//!   object, where readers attach to in-flight writers
//! - the **read VC state machine** - walks fragments, reads from disk or
//!   waits on a writer, and ships bytes to the consumer
//! - the **range engine** - `Range` / `Content-Range` parsing and
//!   multipart/byteranges bookkeeping
//!
//! Disk layout, write aggregation and the HTTP state machines stay with
//! the surrounding collaborators, which plug in through the
//! [`Directory`], [`VolumeIo`], [`AltSelect`] and [`Scheduler`] traits.
//!
//! # Example
//!
//! ```
//! use alt_cache::{
//!     Cache, CacheCtx, CacheKey, Event, EventData, HttpHeader, ReadStep,
//!     mock::{FirstAlt, MockDirectory, MockVolume},
//! };
//!
//! let cache = Cache::new();
//! let mut directory = MockDirectory::default();
//! let mut volume = MockVolume::default();
//! let mut rng = rand::thread_rng();
//!
//! let mut ctx = CacheCtx {
//!     directory: &mut directory,
//!     volume: &mut volume,
//!     open_dir: cache.open_dir(),
//!     select: &FirstAlt,
//!     rng: &mut rng,
//! };
//!
//! let key = CacheKey::from_bytes(b"http://example.com/missing");
//! let mut vc = cache.open_read(&key, &HttpHeader::new("GET /missing"))?;
//!
//! // nothing cached and no writer: the open fails with a miss
//! let step = vc.handle(Event::Immediate, EventData::None, &mut ctx);
//! assert!(matches!(step, ReadStep::Fail(alt_cache::Error::NoDoc)));
//! # Ok::<(), alt_cache::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]

mod alternate;
mod cache;
mod coding;
mod directory;
mod doc;
mod error;
mod event;
mod frag_table;
mod headers;
mod key;
mod open_dir;
mod range;
mod read_vc;
mod select;
mod side_buffer;
mod vector;
mod volume;
mod write_vc;

#[doc(hidden)]
pub mod mock;

pub(crate) type HashMap<K, V> = std::collections::HashMap<K, V, xxhash_rust::xxh3::Xxh3Builder>;

pub use {
    alternate::Alternate,
    cache::Cache,
    coding::{Decode, DecodeError, Encode, EncodeError},
    directory::{DirEntry, Directory},
    doc::{Doc, DocMagic, DocType},
    error::{Error, Result},
    event::{Event, Scheduler, Wakeup, COOKIE_FRAG_WRITTEN, COOKIE_WRITER_GONE, RETRY_PERIOD},
    frag_table::{FragmentDescriptor, FragmentTable, FRAG_FLAG_CACHED},
    headers::{HeaderMagic, HttpHeader},
    key::{CacheKey, VcId, VcIdGenerator},
    open_dir::{OpenDir, OpenDirEntry, OpenDirHandle},
    range::{
        parse_content_range, ByteRange, ContentRange, RangeSpec, RangeState, RawRange,
        ResponseRange, BOUNDARY_LEN,
    },
    read_vc::{CacheCtx, EventData, ReadStep, ReadVc, Vio},
    select::AltSelect,
    side_buffer::{ContentSpan, SideBufferList},
    vector::{AltGroup, AltVector, Slice, SliceRef, WriterInfo},
    volume::VolumeIo,
    write_vc::WriteVc,
};

#[cfg(test)]
pub(crate) fn test_rng() -> rand::rngs::StdRng {
    use rand::SeedableRng;
    rand::rngs::StdRng::seed_from_u64(0x5eed)
}
