// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod common;

use alt_cache::{Error, Event, RangeSpec, ReadStep};
use common::{
    body_of, drive, read_full_body, request_with_range, store_object, TestBed, FF,
};
use test_log::test;

#[test]
fn single_range() {
    let mut bed = TestBed::default();
    let body = body_of(FF as usize * 5);
    let key = store_object(&mut bed, "http://example.com/ranged", &body, None);

    let req = request_with_range("http://example.com/ranged", "bytes=1000-2999");
    let mut vc = bed.cache.open_read(&key, &req).expect("open");

    let step = drive(&mut vc, &mut bed);
    assert!(matches!(step, ReadStep::Signal(Event::OpenRead)), "{step:?}");
    assert_eq!(2_000, vc.effective_content_size());

    let (produced, step) = read_full_body(&mut vc, &mut bed);
    assert!(matches!(step, ReadStep::Signal(Event::ReadComplete)));
    assert_eq!(&body[1_000..3_000], &produced[..]);
}

#[test]
fn range_crossing_fragments() {
    let mut bed = TestBed::default();
    let body = body_of(FF as usize * 4);
    let key = store_object(&mut bed, "http://example.com/cross", &body, None);

    // starts in fragment 1, ends in fragment 2
    let start = FF as usize + 100;
    let end = FF as usize * 2 + 99;
    let req = request_with_range("http://example.com/cross", &format!("bytes={start}-{end}"));
    let mut vc = bed.cache.open_read(&key, &req).expect("open");

    let step = drive(&mut vc, &mut bed);
    assert!(matches!(step, ReadStep::Signal(Event::OpenRead)));

    let (produced, step) = read_full_body(&mut vc, &mut bed);
    assert!(matches!(step, ReadStep::Signal(Event::ReadComplete)));
    assert_eq!(&body[start..=end], &produced[..]);
}

#[test]
fn suffix_range() {
    let mut bed = TestBed::default();
    let body = body_of(1_200);
    let key = store_object(&mut bed, "http://example.com/suffix", &body, None);

    let req = request_with_range("http://example.com/suffix", "bytes=-500");
    let mut vc = bed.cache.open_read(&key, &req).expect("open");

    let step = drive(&mut vc, &mut bed);
    assert!(matches!(step, ReadStep::Signal(Event::OpenRead)));
    assert_eq!(500, vc.effective_content_size());

    let (produced, step) = read_full_body(&mut vc, &mut bed);
    assert!(matches!(step, ReadStep::Signal(Event::ReadComplete)));
    assert_eq!(&body[700..], &produced[..]);
}

#[test]
fn multipart_response_layout() {
    let mut bed = TestBed::default();
    let body: Vec<u8> = (b'a'..b'a' + 30).collect();
    let key = store_object(
        &mut bed,
        "http://example.com/parts",
        &body,
        Some("text/plain"),
    );

    let req = request_with_range("http://example.com/parts", "bytes=0-9,20-29");
    let mut vc = bed.cache.open_read(&key, &req).expect("open");

    let step = drive(&mut vc, &mut bed);
    assert!(matches!(step, ReadStep::Signal(Event::OpenRead)));

    let announced = vc.effective_content_size();
    let boundary = vc.range_boundary().expect("multipart").to_owned();

    let (produced, step) = read_full_body(&mut vc, &mut bed);
    assert!(matches!(step, ReadStep::Signal(Event::ReadComplete)));

    // announced length matches the bytes actually shipped
    assert_eq!(announced, produced.len() as u64);

    let expected_first = format!(
        "\r\n--{boundary}\r\nContent-Range: bytes 0-9/30  \r\nContent-Type: text/plain\r\n\r\n"
    );
    let expected_second = format!(
        "\r\n--{boundary}\r\nContent-Range: bytes 20-29/30\r\nContent-Type: text/plain\r\n\r\n"
    );
    let expected_tail = format!("\r\n--{boundary}--");

    let mut expected = Vec::new();
    expected.extend_from_slice(expected_first.as_bytes());
    expected.extend_from_slice(&body[0..10]);
    expected.extend_from_slice(expected_second.as_bytes());
    expected.extend_from_slice(&body[20..30]);
    expected.extend_from_slice(expected_tail.as_bytes());

    assert_eq!(
        String::from_utf8_lossy(&expected),
        String::from_utf8_lossy(&produced)
    );
}

#[test]
fn multipart_content_length_formula() {
    let mut spec = RangeSpec::parse("bytes=0-9,20-29").expect("parses");
    assert!(spec.apply(30));

    let ct_len = "text/plain".len() as u64;
    assert_eq!(
        20 + 2 * RangeSpec::calc_part_boundary_size(30, ct_len) + RangeSpec::final_boundary_size(),
        spec.calc_content_length(30, ct_len)
    );
}

#[test]
fn unsatisfiable_range_fails_before_body() {
    let mut bed = TestBed::default();
    let body = body_of(1_000);
    let key = store_object(&mut bed, "http://example.com/beyond", &body, None);

    let req = request_with_range("http://example.com/beyond", "bytes=10000-");
    let mut vc = bed.cache.open_read(&key, &req).expect("open");

    let step = drive(&mut vc, &mut bed);
    assert!(
        matches!(step, ReadStep::Fail(Error::UnsatisfiableRange)),
        "{step:?}"
    );
    assert!(vc.take_output().is_empty());
}

#[test]
fn malformed_range_field_is_rejected_at_open() {
    let bed = TestBed::default();
    let key = alt_cache::CacheKey::from_bytes(b"http://example.com/bad");

    let req = request_with_range("http://example.com/bad", "bytes=tail");
    assert!(bed.cache.open_read(&key, &req).is_err());
}
