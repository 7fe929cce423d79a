// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod common;

use alt_cache::{
    mock::MockScheduler, ContentSpan, Directory, Doc, Encode, Error, Event, ReadStep, Scheduler,
    COOKIE_FRAG_WRITTEN, COOKIE_WRITER_GONE,
};
use common::{body_of, build_alternate, deliver, drive, request, TestBed, FF};
use test_log::test;

#[test]
fn reader_attaches_to_writer_and_streams_fragments() {
    let mut bed = TestBed::default();
    let url = "http://example.com/filling";
    let body = body_of(FF as usize * 3);

    let first_key = alt_cache::CacheKey::from_bytes(url.as_bytes());
    let alt = build_alternate(url, body.len() as u64, None);

    let mut writer = bed.cache.open_write(&first_key);
    writer.begin_vector_update().expect("slot is free");
    let wakeups = writer.install_alternate(alt.clone(), None, body.len() as u64);
    assert!(wakeups.is_empty(), "no readers were parked yet");

    let mut vc = bed
        .cache
        .open_read_from_writer(&writer, &request(url))
        .expect("open");

    // earliest fragment is not produced yet: the reader parks, but the
    // read side must still be reported open
    let step = drive(&mut vc, &mut bed);
    assert!(matches!(step, ReadStep::Signal(Event::OpenRead)), "{step:?}");
    vc.start_read(vc.effective_content_size(), 1 << 20);

    let mut produced = Vec::new();
    let mut completed = false;

    for idx in 0..3u32 {
        let start = idx as usize * FF as usize;
        let chunk = &body[start..start + FF as usize];
        let frag_key = alt.frag_key(idx);

        // the writer lands the fragment on disk, then announces it
        let doc = Doc::new(first_key, frag_key, Vec::new(), chunk.to_vec().into());
        let entry = bed.volume.store(doc.encode_into_vec().expect("doc encodes"));
        bed.directory.insert(&frag_key, entry);

        writer.write_active(start as u64);
        let scheduler = MockScheduler::default();
        for wakeup in
            writer.write_complete(&ContentSpan::new(start as u64, chunk.to_vec()), true)
        {
            scheduler.wake_up(wakeup);
        }
        assert_eq!(1, scheduler.len(), "the parked reader is woken");

        while let Some(wakeup) = scheduler.pop() {
            assert_eq!(vc.id(), wakeup.vc);
            assert_eq!(COOKIE_FRAG_WRITTEN, wakeup.cookie);
            let mut step = deliver(&mut vc, &mut bed, wakeup);
            loop {
                produced.append(&mut vc.take_output());
                match step {
                    ReadStep::Signal(Event::OpenRead) => {
                        // woken out of the earliest-fragment wait
                        step = drive(&mut vc, &mut bed);
                    }
                    ReadStep::Signal(Event::ReadReady) => {
                        step = drive(&mut vc, &mut bed);
                    }
                    ReadStep::Signal(Event::ReadComplete) => {
                        completed = true;
                        break;
                    }
                    ReadStep::Wait => break,
                    other => panic!("unexpected step {other:?}"),
                }
            }
        }
    }

    assert!(completed);
    assert_eq!(body, produced);

    let wakeups = writer.close(bed.cache.open_dir());
    assert!(wakeups.is_empty());
}

#[test]
fn handed_over_bytes_ship_without_any_disk_read() {
    let mut bed = TestBed::default();
    let url = "http://example.com/handoff";
    let body = body_of(3_000);

    let first_key = alt_cache::CacheKey::from_bytes(url.as_bytes());
    let alt = build_alternate(url, body.len() as u64, None);

    let mut writer = bed.cache.open_write(&first_key);
    writer.begin_vector_update().expect("slot is free");

    // the reader arrives while the vector update is in flight
    let mut vc = bed
        .cache
        .open_read_from_writer(&writer, &request(url))
        .expect("open");
    let step = drive(&mut vc, &mut bed);
    assert!(matches!(step, ReadStep::Wait), "{step:?}");

    let earliest = alt.earliest_key();
    let wakeups = writer.install_alternate(alt, None, body.len() as u64);
    assert_eq!(1, wakeups.len());
    assert_eq!(Event::WriterUpdatedAltTable, wakeups[0].event);
    assert_eq!(earliest.fold(), wakeups[0].cookie);

    let step = deliver(&mut vc, &mut bed, wakeups[0].clone());
    assert!(matches!(step, ReadStep::Signal(Event::OpenRead)), "{step:?}");

    vc.start_read(vc.effective_content_size(), 1 << 20);
    let step = drive(&mut vc, &mut bed);
    assert!(matches!(step, ReadStep::Wait), "parked on the writer");

    // the fragment never touches the directory or the volume, the bytes
    // ride the wake-up
    writer.write_active(0);
    let wakeups = writer.write_complete(&ContentSpan::new(0, body.clone()), true);
    assert_eq!(1, wakeups.len());

    let step = deliver(&mut vc, &mut bed, wakeups[0].clone());
    let produced = vc.take_output();
    assert!(matches!(step, ReadStep::Signal(Event::ReadComplete)), "{step:?}");
    assert_eq!(body, produced);
    assert!(bed.directory.is_empty());

    writer.close(bed.cache.open_dir());
}

#[test]
fn writer_abort_wakes_waiters_with_writer_gone() {
    let mut bed = TestBed::default();
    let url = "http://example.com/aborted";
    let body = body_of(FF as usize * 2);

    let first_key = alt_cache::CacheKey::from_bytes(url.as_bytes());
    let alt = build_alternate(url, body.len() as u64, None);

    let mut writer = bed.cache.open_write(&first_key);
    writer.begin_vector_update().expect("slot is free");
    writer.install_alternate(alt.clone(), None, body.len() as u64);

    let mut vc = bed
        .cache
        .open_read_from_writer(&writer, &request(url))
        .expect("open");
    let step = drive(&mut vc, &mut bed);
    assert!(matches!(step, ReadStep::Signal(Event::OpenRead)));
    vc.start_read(vc.effective_content_size(), 1 << 20);

    // fragment 0 arrives, the reader ships it and parks on fragment 1
    let frag_key = alt.frag_key(0);
    let doc = Doc::new(
        first_key,
        frag_key,
        Vec::new(),
        body[..FF as usize].to_vec().into(),
    );
    let entry = bed.volume.store(doc.encode_into_vec().expect("doc encodes"));
    bed.directory.insert(&frag_key, entry);

    writer.write_active(0);
    let wakeups =
        writer.write_complete(&ContentSpan::new(0, body[..FF as usize].to_vec()), true);
    assert_eq!(1, wakeups.len());

    let mut step = deliver(&mut vc, &mut bed, wakeups[0].clone());
    loop {
        vc.take_output();
        match step {
            ReadStep::Signal(Event::OpenRead) | ReadStep::Signal(Event::ReadReady) => {
                step = drive(&mut vc, &mut bed);
            }
            ReadStep::Wait => break,
            other => panic!("unexpected step {other:?}"),
        }
    }

    // the writer dies before fragment 1 exists
    let wakeups = writer.close(bed.cache.open_dir());
    assert_eq!(1, wakeups.len());
    assert_eq!(COOKIE_WRITER_GONE, wakeups[0].cookie);

    let step = deliver(&mut vc, &mut bed, wakeups[0].clone());
    assert!(matches!(step, ReadStep::Fail(Error::WriterGone)), "{step:?}");
}

#[test]
fn side_buffer_serves_the_misaligned_tail() {
    let mut bed = TestBed::default();
    let url = "http://example.com/tail";
    let body = body_of(FF as usize + 100);

    let first_key = alt_cache::CacheKey::from_bytes(url.as_bytes());
    let alt = build_alternate(url, body.len() as u64, None);

    let mut writer = bed.cache.open_write(&first_key);
    writer.begin_vector_update().expect("slot is free");
    writer.install_alternate(alt.clone(), None, body.len() as u64);

    let mut vc = bed
        .cache
        .open_read_from_writer(&writer, &request(url))
        .expect("open");
    let step = drive(&mut vc, &mut bed);
    assert!(matches!(step, ReadStep::Signal(Event::OpenRead)));
    vc.start_read(vc.effective_content_size(), 1 << 20);

    // the tail missed the fragment boundary and sits in the lookaside
    writer.add_side_buffer(&body[FF as usize..], FF);

    // fragment 0 lands on disk and is announced
    let frag_key = alt.frag_key(0);
    let doc = Doc::new(
        first_key,
        frag_key,
        Vec::new(),
        body[..FF as usize].to_vec().into(),
    );
    let entry = bed.volume.store(doc.encode_into_vec().expect("doc encodes"));
    bed.directory.insert(&frag_key, entry);

    writer.write_active(0);
    let wakeups =
        writer.write_complete(&ContentSpan::new(0, body[..FF as usize].to_vec()), true);
    assert_eq!(1, wakeups.len());

    let mut produced = Vec::new();
    let mut step = deliver(&mut vc, &mut bed, wakeups[0].clone());
    loop {
        produced.append(&mut vc.take_output());
        match step {
            ReadStep::Signal(Event::OpenRead) | ReadStep::Signal(Event::ReadReady) => {
                step = drive(&mut vc, &mut bed);
            }
            ReadStep::Signal(Event::ReadComplete) => break,
            other => panic!("unexpected step {other:?}"),
        }
    }

    assert_eq!(body, produced);
    writer.close(bed.cache.open_dir());
}
