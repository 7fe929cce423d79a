// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::spec::{ByteRange, RangeSpec, RangeState};
use crate::{headers::HttpHeader, key::CacheKey};

/// Tracks range progress while a response body is produced.
///
/// Holds the resolved range spec plus the current object offset and range
/// index. For simplicity of the shipping logic an empty spec pretends to
/// be a single range covering the whole object.
#[derive(Clone, Debug, Default)]
pub struct ResponseRange {
    /// Total object length, once known.
    len: u64,

    /// Current offset in the object.
    offset: u64,

    /// Current range index, `None` before the first range is entered.
    idx: Option<usize>,

    spec: RangeSpec,

    /// Cached `Content-Type` of the selected alternate.
    content_type: Option<String>,

    /// Boundary string between multipart parts.
    boundary: String,

    resolved: bool,

    /// The current range was exhausted and the next part header is due.
    pending_range_shift: bool,
}

impl ResponseRange {
    /// Parses the `Range` field of a request, if present.
    ///
    /// Returns `false` when the field exists but is malformed.
    pub fn init(&mut self, request: &HttpHeader) -> bool {
        match request.range() {
            None => true,
            Some(value) => match RangeSpec::parse(value) {
                Some(spec) => {
                    self.spec = spec;
                    true
                }
                None => false,
            },
        }
    }

    /// Whether the request carried actual ranges.
    #[must_use]
    pub fn has_ranges(&self) -> bool {
        matches!(self.spec.state(), RangeState::Single | RangeState::Multi)
    }

    /// Whether the response is multipart.
    #[must_use]
    pub fn is_multi(&self) -> bool {
        self.spec.is_multi()
    }

    /// Whether all offsets are absolute.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Current object offset.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Current range index.
    #[must_use]
    pub fn idx(&self) -> Option<usize> {
        self.idx
    }

    /// Number of resolved ranges.
    #[must_use]
    pub fn count(&self) -> usize {
        self.spec.count()
    }

    /// Range at `n`.
    ///
    /// # Panics
    ///
    /// Panics if `n` is out of bounds.
    #[must_use]
    pub fn get(&self, n: usize) -> ByteRange {
        self.spec.get(n)
    }

    /// Access to the underlying spec.
    #[must_use]
    pub fn spec(&self) -> &RangeSpec {
        &self.spec
    }

    /// Remaining contiguous bytes of the current range.
    #[must_use]
    pub fn remnant_size(&self) -> u64 {
        match self.spec.state() {
            RangeState::Empty => self.len.saturating_sub(self.offset),
            RangeState::Single | RangeState::Multi => match self.idx {
                Some(i) if i < self.spec.count() => {
                    (self.spec.get(i).max + 1).saturating_sub(self.offset)
                }
                _ => 0,
            },
            RangeState::Unsatisfiable => 0,
        }
    }

    /// Applies the object length and moves to the start of the range set.
    ///
    /// With `len == None` (length not yet known) resolution succeeds only
    /// when every range is absolute.
    pub fn resolve(&mut self, len: Option<u64>) -> bool {
        let ok = match len {
            None => self.spec.apply_unbounded(),
            Some(len) => {
                if self.spec.apply(len) {
                    self.len = len;
                    true
                } else {
                    false
                }
            }
        };

        if ok {
            self.resolved = true;
            self.start();
        }
        ok
    }

    /// Positions the cursor at the first range.
    ///
    /// Returns `false` if the spec is unsatisfiable.
    pub fn start(&mut self) -> bool {
        match self.spec.state() {
            RangeState::Empty => {
                self.offset = 0;
                true
            }
            RangeState::Single | RangeState::Multi => {
                self.idx = Some(0);
                self.offset = self.spec.get(0).min;
                self.pending_range_shift = self.spec.is_multi();
                true
            }
            RangeState::Unsatisfiable => false,
        }
    }

    /// Advances `size` bytes, crossing to the next range when the current
    /// one is exhausted.
    ///
    /// Crossing a range boundary sets the pending range shift so the next
    /// shipped content is preceded by a part header.
    pub fn consume(&mut self, size: u64) -> u64 {
        match self.spec.state() {
            RangeState::Empty => {
                self.offset += size;
            }
            RangeState::Single => {
                let i = self.idx.unwrap_or(0);
                self.offset += size.min((self.spec.get(i).max + 1).saturating_sub(self.offset));
            }
            RangeState::Multi => {
                let i = self.idx.expect("multi range must be started");
                if i >= self.spec.count() {
                    return self.offset;
                }
                debug_assert!(!self.pending_range_shift);
                debug_assert!(size <= (self.spec.get(i).max + 1).saturating_sub(self.offset));

                self.offset += size;
                if self.offset > self.spec.get(i).max {
                    let next = i + 1;
                    self.idx = Some(next);
                    if next < self.spec.count() {
                        self.offset = self.spec.get(next).min;
                        self.pending_range_shift = true;
                    }
                }
            }
            RangeState::Unsatisfiable => {}
        }

        self.offset
    }

    /// Whether every range has been fully consumed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        match self.spec.state() {
            RangeState::Empty => self.resolved && self.offset >= self.len,
            RangeState::Single | RangeState::Multi => {
                self.idx.is_some_and(|i| i >= self.spec.count())
                    || (self.spec.count() > 0 && self.remnant_size() == 0)
            }
            RangeState::Unsatisfiable => true,
        }
    }

    /// Whether a consume crossed into a new range.
    #[must_use]
    pub fn has_pending_range_shift(&self) -> bool {
        self.pending_range_shift
    }

    /// Clears the pending range shift.
    pub fn consume_range_shift(&mut self) {
        self.pending_range_shift = false;
    }

    /// The multipart boundary string.
    #[must_use]
    pub fn boundary_str(&self) -> &str {
        &self.boundary
    }

    /// Generates the boundary string for this response.
    ///
    /// 48 hex characters: the two object key halves plus 64 random bits,
    /// unique per response.
    pub fn generate_boundary<R: rand::Rng>(&mut self, key: &CacheKey, rng: &mut R) {
        let rnd: u64 = rng.gen();
        self.boundary = format!(
            "{:016x}{:016x}{:016x}",
            key.slice64(0),
            key.slice64(1),
            rnd
        );
    }

    /// Remembers the alternate's `Content-Type` for part headers.
    pub fn set_content_type_from(&mut self, response: &HttpHeader) {
        self.content_type = response.content_type().map(str::to_owned);
    }

    /// The remembered `Content-Type`.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Effective `Content-Length` of the body to be produced.
    #[must_use]
    pub fn calc_content_length(&self) -> u64 {
        let ct_len = self.content_type.as_ref().map_or(0, |ct| ct.len() as u64);
        self.spec.calc_content_length(self.len, ct_len)
    }

    /// Resets to a reusable state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_range(value: &str) -> HttpHeader {
        let mut req = HttpHeader::new("GET /object");
        req.set("Range", value);
        req
    }

    #[test]
    fn empty_spec_covers_whole_object() {
        let mut range = ResponseRange::default();
        assert!(range.init(&HttpHeader::new("GET /object")));
        assert!(range.resolve(Some(100)));

        assert_eq!(0, range.offset());
        assert_eq!(100, range.remnant_size());
        assert_eq!(100, range.calc_content_length());

        range.consume(60);
        assert_eq!(40, range.remnant_size());
        assert!(!range.is_exhausted());

        range.consume(40);
        assert!(range.is_exhausted());
    }

    #[test]
    fn single_range_walk() {
        let mut range = ResponseRange::default();
        assert!(range.init(&request_with_range("bytes=10-19")));
        assert!(range.resolve(Some(100)));

        assert_eq!(10, range.offset());
        assert_eq!(10, range.remnant_size());
        assert!(!range.has_pending_range_shift());

        range.consume(10);
        assert_eq!(0, range.remnant_size());
    }

    #[test]
    fn multi_range_shifts() {
        let mut range = ResponseRange::default();
        assert!(range.init(&request_with_range("bytes=0-9,20-29")));
        assert!(range.resolve(Some(30)));

        // the first part header is pending immediately
        assert!(range.has_pending_range_shift());
        range.consume_range_shift();

        range.consume(10);
        assert!(range.has_pending_range_shift());
        assert_eq!(20, range.offset());
        range.consume_range_shift();

        range.consume(10);
        assert!(!range.has_pending_range_shift());
        assert!(range.is_exhausted());
    }

    #[test]
    fn malformed_range_field_fails_init() {
        let mut range = ResponseRange::default();
        assert!(!range.init(&request_with_range("bytes=oops")));
    }

    #[test]
    fn unresolvable_without_length() {
        let mut range = ResponseRange::default();
        assert!(range.init(&request_with_range("bytes=-100")));
        assert!(!range.resolve(None));

        let mut range = ResponseRange::default();
        assert!(range.init(&request_with_range("bytes=5-9")));
        assert!(range.resolve(None));
        assert_eq!(5, range.offset());
    }

    #[test]
    fn boundary_is_48_hex_chars() {
        let mut range = ResponseRange::default();
        let mut rng = crate::test_rng();
        range.generate_boundary(&CacheKey::new(1, 2), &mut rng);

        assert_eq!(crate::range::BOUNDARY_LEN, range.boundary_str().len());
        assert!(range
            .boundary_str()
            .bytes()
            .all(|b| b.is_ascii_hexdigit()));
    }
}
