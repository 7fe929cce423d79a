// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{key::VcId, side_buffer::ContentSpan};
use std::time::Duration;

/// How long a VC sleeps before retrying a lock it could not take.
pub const RETRY_PERIOD: Duration = Duration::from_millis(10);

/// Wake-up cookie attached when a fragment write completed.
pub const COOKIE_FRAG_WRITTEN: u64 = 0x56;

/// Wake-up cookie attached when a slice lost its last writer.
pub const COOKIE_WRITER_GONE: u64 = 0x112;

/// Events exchanged between VCs, the scheduler and client continuations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    /// Scheduled immediate callback
    Immediate,

    /// Disk I/O completed
    AioDone,

    /// Read side is open and an alternate is selected
    OpenRead,

    /// Open failed; the error is reported alongside
    OpenReadFailed,

    /// Body bytes are available to the consumer
    ReadReady,

    /// The read side delivered all requested bytes
    ReadComplete,

    /// End of stream before the consumer was satisfied
    Eos,

    /// Unrecoverable failure
    Error,

    /// Object removal
    Remove,

    /// Volume scan started
    Scan,

    /// Scan yielded one object
    ScanObject,

    /// Scan finished
    ScanDone,

    /// Scan failed
    ScanFailed,

    /// A writer published an updated alternate vector
    WriterUpdatedAltTable,
}

/// A deferred signal for a parked VC.
///
/// Produced by writer bookkeeping under the open-directory lock and
/// delivered by the scheduler after the lock is dropped. When a fragment
/// write produced the bytes a waiter needs, they ride along so the waiter
/// can ship without re-reading from disk.
#[derive(Clone, Debug)]
pub struct Wakeup {
    /// The parked VC.
    pub vc: VcId,

    /// Event to deliver.
    pub event: Event,

    /// Correlation cookie (`COOKIE_*` or a folded key).
    pub cookie: u64,

    /// Fragment bytes handed over by the completing writer.
    pub buffer: Option<ContentSpan>,
}

/// Continuation scheduling as the event system exposes it to the core.
pub trait Scheduler {
    /// Re-enters `vc` after `delay`.
    fn schedule_in(&self, vc: VcId, delay: Duration);

    /// Re-enters `vc` as soon as possible.
    fn schedule_imm(&self, vc: VcId);

    /// Delivers a wake-up to a parked VC.
    fn wake_up(&self, wakeup: Wakeup);
}
