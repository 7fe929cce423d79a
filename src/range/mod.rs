// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! HTTP byte-range support: `Range` / `Content-Range` parsing, resolution
//! against the object length, and multipart/byteranges bookkeeping.

mod cursor;
mod spec;

pub use cursor::ResponseRange;
pub use spec::{
    parse_content_range, ByteRange, ContentRange, RangeSpec, RangeState, RawRange, BOUNDARY_LEN,
};
