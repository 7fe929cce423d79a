// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Length of a multipart range boundary string (48 hex characters).
pub const BOUNDARY_LEN: usize = 48;

/// Maximum digits accepted for a range bound, guards against overflow.
const MAX_DIGITS: usize = 15;

/// A resolved byte range, inclusive on both ends.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ByteRange {
    /// First byte position.
    pub min: u64,

    /// Last byte position (inclusive).
    pub max: u64,
}

impl ByteRange {
    /// Creates a range; `min` must not exceed `max`.
    #[must_use]
    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// Number of bytes covered.
    #[must_use]
    pub fn len(&self) -> u64 {
        (self.max - self.min) + 1
    }

    /// Always `false`; inclusive ranges cover at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `pos` falls inside the range.
    #[must_use]
    pub fn contains(&self, pos: u64) -> bool {
        self.min <= pos && pos <= self.max
    }
}

/// One element of a `Range` field before resolution against the length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RawRange {
    /// `X-Y`
    Bounded {
        /// First byte position.
        min: u64,
        /// Last byte position (inclusive).
        max: u64,
    },

    /// `X-`
    Prefix {
        /// First byte position.
        min: u64,
    },

    /// `-Y`
    Suffix {
        /// Number of trailing bytes.
        len: u64,
    },
}

impl RawRange {
    /// Whether this is a `-Y` suffix element.
    #[must_use]
    pub fn is_suffix(&self) -> bool {
        matches!(self, Self::Suffix { .. })
    }

    /// Resolves against an object of `len > 0` bytes.
    ///
    /// Returns `None` for elements that select no bytes.
    fn apply(self, len: u64) -> Option<ByteRange> {
        match self {
            Self::Bounded { min, max } => {
                if min > max || min >= len {
                    None
                } else {
                    Some(ByteRange::new(min, max.min(len - 1)))
                }
            }
            Self::Prefix { min } => {
                if min >= len {
                    None
                } else {
                    Some(ByteRange::new(min, len - 1))
                }
            }
            Self::Suffix { len: n } => {
                if n == 0 {
                    None
                } else {
                    Some(ByteRange::new(len.saturating_sub(n), len - 1))
                }
            }
        }
    }
}

/// Lifecycle state of a range spec after [`RangeSpec::apply`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RangeState {
    /// No ranges; the full object is selected.
    #[default]
    Empty,

    /// Exactly one resolved range.
    Single,

    /// Two or more resolved ranges; the response is multipart.
    Multi,

    /// Every range falls outside the object.
    Unsatisfiable,
}

/// A parsed `Range` field value.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RangeSpec {
    raw: Vec<RawRange>,
    ranges: Vec<ByteRange>,
    state: RangeState,
}

fn parse_bound(s: &str) -> Option<u64> {
    if s.is_empty() || s.len() > MAX_DIGITS || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

impl RangeSpec {
    /// Parses a `Range` field value (`bytes=` syntax).
    ///
    /// Parsing is atomic: a single malformed element rejects the whole
    /// value and `None` is returned.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let rest = strip_prefix_ignore_case(value.trim_start(), "bytes")?;
        let rest = rest.strip_prefix('=')?;

        let mut raw = Vec::new();

        for element in rest.split(',') {
            // whitespace around the comma is tolerated, inside an element it is not
            let element = element.trim();
            let (min_s, max_s) = element.split_once('-')?;

            let range = if min_s.is_empty() {
                RawRange::Suffix {
                    len: parse_bound(max_s)?,
                }
            } else if max_s.is_empty() {
                RawRange::Prefix {
                    min: parse_bound(min_s)?,
                }
            } else {
                RawRange::Bounded {
                    min: parse_bound(min_s)?,
                    max: parse_bound(max_s)?,
                }
            };

            raw.push(range);
        }

        if raw.is_empty() {
            return None;
        }

        let state = if raw.len() == 1 {
            RangeState::Single
        } else {
            RangeState::Multi
        };

        Some(Self {
            raw,
            ranges: Vec::new(),
            state,
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RangeState {
        self.state
    }

    /// Whether there are parsed range elements.
    #[must_use]
    pub fn has_ranges(&self) -> bool {
        !self.raw.is_empty()
    }

    /// Whether any element needs the object length to resolve.
    #[must_use]
    pub fn has_open_range(&self) -> bool {
        self.raw
            .iter()
            .any(|r| matches!(r, RawRange::Prefix { .. } | RawRange::Suffix { .. }))
    }

    /// Whether the spec resolved to more than one range.
    #[must_use]
    pub fn is_multi(&self) -> bool {
        self.state == RangeState::Multi
    }

    /// Whether the spec selects the whole object.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state == RangeState::Empty
    }

    /// Whether the spec is in a servable state.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state != RangeState::Unsatisfiable
    }

    /// Number of resolved ranges.
    #[must_use]
    pub fn count(&self) -> usize {
        self.ranges.len()
    }

    /// Resolved range at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    #[must_use]
    pub fn get(&self, idx: usize) -> ByteRange {
        self.ranges[idx]
    }

    /// Iterates the resolved ranges.
    pub fn iter(&self) -> impl Iterator<Item = ByteRange> + '_ {
        self.ranges.iter().copied()
    }

    /// Resolves all elements against an object of `len` bytes.
    ///
    /// Returns `false` if no byte of the object is selected. The one
    /// special case: on a zero-length object a spec consisting only of
    /// suffix elements degrades to [`RangeState::Empty`] (the server may
    /// answer with the full, empty body) rather than unsatisfiable.
    pub fn apply(&mut self, len: u64) -> bool {
        self.ranges.clear();

        if self.raw.is_empty() {
            self.state = RangeState::Empty;
            return true;
        }

        if len == 0 {
            self.state = if self.raw.iter().all(RawRange::is_suffix) {
                RangeState::Empty
            } else {
                RangeState::Unsatisfiable
            };
            return self.state == RangeState::Empty;
        }

        for r in &self.raw {
            if let Some(applied) = r.apply(len) {
                self.ranges.push(applied);
            }
        }

        self.state = match self.ranges.len() {
            0 => RangeState::Unsatisfiable,
            1 => RangeState::Single,
            _ => RangeState::Multi,
        };

        self.state != RangeState::Unsatisfiable
    }

    /// Resolves without a known object length.
    ///
    /// Only possible when every element carries absolute offsets.
    pub fn apply_unbounded(&mut self) -> bool {
        if self.has_open_range() {
            return false;
        }

        self.ranges = self
            .raw
            .iter()
            .filter_map(|r| match *r {
                RawRange::Bounded { min, max } if min <= max => Some(ByteRange::new(min, max)),
                _ => None,
            })
            .collect();

        self.state = match self.ranges.len() {
            0 => {
                if self.raw.is_empty() {
                    RangeState::Empty
                } else {
                    RangeState::Unsatisfiable
                }
            }
            1 => RangeState::Single,
            _ => RangeState::Multi,
        };

        self.state != RangeState::Unsatisfiable
    }

    /// Minimal single range containing all resolved ranges.
    #[must_use]
    pub fn convex_hull(&self) -> Option<ByteRange> {
        let min = self.ranges.iter().map(|r| r.min).min()?;
        let max = self.ranges.iter().map(|r| r.max).max()?;
        Some(ByteRange::new(min, max))
    }

    /// Total number of content bytes selected.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.ranges.iter().map(ByteRange::len).sum()
    }

    /// Size of one multipart part header block.
    #[must_use]
    pub fn calc_part_boundary_size(object_size: u64, ct_len: u64) -> u64 {
        let l = digits(object_size);

        // CRLF "--" boundary CRLF "Content-Range: bytes" location CRLF
        // [ "Content-Type: " value CRLF ] CRLF
        let mut size = 4 + BOUNDARY_LEN as u64 + 2 + 15 + 5 + (3 * l + 3) + 2 + 2;
        if ct_len > 0 {
            size += 14 + ct_len + 2;
        }
        size
    }

    /// Size of the closing `CRLF "--" boundary "--"` marker.
    #[must_use]
    pub fn final_boundary_size() -> u64 {
        4 + BOUNDARY_LEN as u64 + 2
    }

    /// Effective `Content-Length` of the response body.
    #[must_use]
    pub fn calc_content_length(&self, object_size: u64, ct_len: u64) -> u64 {
        match self.ranges.len() {
            0 => object_size,
            1 => self.size(),
            n => {
                self.size()
                    + n as u64 * Self::calc_part_boundary_size(object_size, ct_len)
                    + Self::final_boundary_size()
            }
        }
    }

    /// Writes one multipart part header block.
    ///
    /// The `Content-Range` location text is space-padded to a fixed width
    /// so the total body length is computable up front.
    pub fn write_part_boundary(
        out: &mut Vec<u8>,
        boundary: &str,
        total_size: u64,
        low: u64,
        high: u64,
        content_type: Option<&str>,
    ) -> u64 {
        let before = out.len();
        let loc_width = (3 * digits(total_size) + 3) as usize;

        out.extend_from_slice(b"\r\n--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(b"\r\nContent-Range: bytes");

        let mut loc = format!(" {low}-{high}/{total_size}");
        while loc.len() < loc_width {
            loc.push(' ');
        }
        out.extend_from_slice(loc.as_bytes());
        out.extend_from_slice(b"\r\n");

        if let Some(ct) = content_type {
            out.extend_from_slice(b"Content-Type: ");
            out.extend_from_slice(ct.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"\r\n");
        (out.len() - before) as u64
    }

    /// Writes the closing boundary marker after the final range.
    pub fn write_final_boundary(out: &mut Vec<u8>, boundary: &str) -> u64 {
        let before = out.len();
        out.extend_from_slice(b"\r\n--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(b"--");
        (out.len() - before) as u64
    }

    /// Formats the parsed elements back to `bytes=` syntax.
    #[must_use]
    pub fn print(&self) -> Option<String> {
        if self.raw.is_empty() {
            return None;
        }

        let mut s = String::from("bytes=");
        for (i, r) in self.raw.iter().enumerate() {
            if i > 0 {
                s.push(',');
            }
            match *r {
                RawRange::Bounded { min, max } => s.push_str(&format!("{min}-{max}")),
                RawRange::Prefix { min } => s.push_str(&format!("{min}-")),
                RawRange::Suffix { len } => s.push_str(&format!("-{len}")),
            }
        }
        Some(s)
    }

    /// Formats the elements quantized for an origin refetch.
    ///
    /// Each absolute range is rounded out to `quantum` boundaries, ranges
    /// separated by at most `interstitial` bytes are merged, suffixes merge
    /// by taking the maximum suffix length, and `rlimit` (if given) clips
    /// everything to `[0, rlimit - 1]`.
    #[must_use]
    pub fn print_quantized(
        &self,
        quantum: u64,
        interstitial: u64,
        rlimit: Option<u64>,
    ) -> Option<String> {
        if self.raw.is_empty() {
            return None;
        }

        let mut suffix: Option<u64> = None;
        let mut absolute: Vec<(u64, u64)> = Vec::new();

        for r in &self.raw {
            match *r {
                RawRange::Suffix { len } => {
                    suffix = Some(suffix.map_or(len, |s| s.max(len)));
                }
                RawRange::Bounded { min, max } => {
                    if min <= max {
                        absolute.push(quantize(min, max, quantum));
                    }
                }
                RawRange::Prefix { min } => {
                    let (min, _) = quantize(min, min, quantum);
                    absolute.push((min, u64::MAX));
                }
            }
        }

        if let Some(limit) = rlimit {
            if limit == 0 {
                absolute.clear();
            } else {
                absolute.retain(|&(min, _)| min < limit);
                for r in &mut absolute {
                    r.1 = r.1.min(limit - 1);
                }
            }
        }

        absolute.sort_unstable();

        let mut merged: Vec<(u64, u64)> = Vec::new();
        for (min, max) in absolute {
            match merged.last_mut() {
                Some(last) if min.saturating_sub(last.1) <= interstitial + 1 => {
                    last.1 = last.1.max(max);
                }
                _ => merged.push((min, max)),
            }
        }

        if merged.is_empty() && suffix.is_none() {
            return None;
        }

        let mut s = String::from("bytes=");
        let mut first = true;
        for (min, max) in merged {
            if !first {
                s.push(',');
            }
            first = false;
            if max == u64::MAX {
                s.push_str(&format!("{min}-"));
            } else {
                s.push_str(&format!("{min}-{max}"));
            }
        }
        if let Some(len) = suffix {
            if !first {
                s.push(',');
            }
            s.push_str(&format!("-{len}"));
        }
        Some(s)
    }
}

fn quantize(min: u64, max: u64, quantum: u64) -> (u64, u64) {
    if quantum <= 1 {
        return (min, max);
    }
    let qmin = (min / quantum) * quantum;
    let qmax = ((max + 1).div_ceil(quantum)) * quantum - 1;
    (qmin, qmax)
}

fn digits(mut x: u64) -> u64 {
    let mut n = 1;
    while x >= 10 {
        x /= 10;
        n += 1;
    }
    n
}

/// A parsed `Content-Range` field value (response side).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContentRange {
    /// `multipart/byteranges; boundary=...`
    Multipart {
        /// The part boundary string.
        boundary: String,
    },

    /// `bytes X-Y/Z`, `bytes */Z` or `bytes X-Y/*`
    Bytes {
        /// The satisfied range, absent for `*/Z`.
        range: Option<ByteRange>,

        /// The complete object length, absent for `X-Y/*`.
        complete_length: Option<u64>,
    },
}

/// Parses a `Content-Range` field value.
///
/// The degenerate combination `bytes */*` is rejected.
#[must_use]
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let v = value.trim();

    if let Some(rest) = strip_prefix_ignore_case(v, "multipart/byteranges") {
        let rest = rest.trim_start_matches(|c: char| c == ';' || c.is_ascii_whitespace());
        let rest = strip_prefix_ignore_case(rest, "boundary")?;
        let boundary = rest.trim_start().strip_prefix('=')?.trim();

        if boundary.is_empty() {
            return None;
        }

        return Some(ContentRange::Multipart {
            boundary: boundary.to_owned(),
        });
    }

    let rest = strip_prefix_ignore_case(v, "bytes")?;
    // must be separated from the location by whitespace
    if !rest.starts_with(|c: char| c.is_ascii_whitespace()) {
        return None;
    }
    let rest = rest.trim();

    let (range_part, total_part) = rest.split_once('/')?;

    let complete_length = if total_part == "*" {
        None
    } else {
        Some(parse_bound(total_part)?)
    };

    let range = if range_part == "*" {
        None
    } else {
        let (min_s, max_s) = range_part.split_once('-')?;
        let min = parse_bound(min_s)?;
        let max = parse_bound(max_s)?;
        if min > max {
            return None;
        }
        Some(ByteRange::new(min, max))
    };

    if range.is_none() && complete_length.is_none() {
        return None;
    }

    Some(ContentRange::Bytes {
        range,
        complete_length,
    })
}
