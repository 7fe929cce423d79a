// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::Arc;

/// Content bytes pinned at an absolute object position.
///
/// Cheap to clone; the payload is shared.
#[derive(Clone, Debug)]
pub struct ContentSpan {
    /// Object offset of the first byte.
    pub position: u64,

    /// The bytes.
    pub data: Arc<[u8]>,
}

impl ContentSpan {
    /// Creates a span.
    #[must_use]
    pub fn new(position: u64, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            position,
            data: data.into(),
        }
    }

    /// Number of bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether the span holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Object offset one past the last byte.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.position + self.len()
    }
}

#[derive(Debug)]
struct SideBuffer {
    position: u64,
    data: Vec<u8>,
}

impl SideBuffer {
    fn end(&self) -> u64 {
        self.position + self.data.len() as u64
    }
}

/// Per-slice lookaside chain for origin bytes that could not yet be
/// written to disk (fragment boundary misalignment).
///
/// Buffers are kept in strictly increasing position order and merged on
/// overlap; overlapping content regions are stored only once.
#[derive(Debug, Default)]
pub struct SideBufferList {
    buffers: Vec<SideBuffer>,
}

impl SideBufferList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct buffers held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the list holds no buffers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Total bytes held.
    #[must_use]
    pub fn byte_count(&self) -> u64 {
        self.buffers.iter().map(|b| b.data.len() as u64).sum()
    }

    /// Inserts `data` at `position`, blending into an overlapping existing
    /// buffer or keeping position order.
    pub fn add(&mut self, data: &[u8], position: u64) {
        let length = data.len() as u64;
        if length == 0 {
            return;
        }

        for (i, buffer) in self.buffers.iter_mut().enumerate() {
            let last = buffer.end();

            if buffer.position <= position && position <= last {
                // overlap at the tail: append the non-overlapping suffix
                let delta = last - position;
                if delta < length {
                    #[allow(clippy::cast_possible_truncation)]
                    buffer.data.extend_from_slice(&data[delta as usize..]);
                }
                return;
            }

            if position <= buffer.position && buffer.position <= position + length {
                // overlap at the head: prepend the non-overlapping prefix
                let delta = buffer.position - position;
                #[allow(clippy::cast_possible_truncation)]
                let mut merged = data[..delta as usize].to_vec();
                merged.append(&mut buffer.data);
                buffer.data = merged;
                buffer.position = position;
                return;
            }

            if position < buffer.position {
                // no overlap, earlier content: insert before
                self.buffers.insert(
                    i,
                    SideBuffer {
                        position,
                        data: data.to_vec(),
                    },
                );
                return;
            }
        }

        self.buffers.push(SideBuffer {
            position,
            data: data.to_vec(),
        });
    }

    /// Retrieves `[position, position + length)` if a single buffer covers
    /// the whole interval.
    ///
    /// Stitching across buffers is not attempted; callers re-issue.
    #[must_use]
    pub fn get(&self, position: u64, length: u64) -> Option<ContentSpan> {
        self.buffers
            .iter()
            .find(|b| b.position <= position && b.end() >= position + length)
            .map(|b| {
                #[allow(clippy::cast_possible_truncation)]
                let start = (position - b.position) as usize;
                #[allow(clippy::cast_possible_truncation)]
                let data: Arc<[u8]> = b.data[start..start + length as usize].into();
                ContentSpan { position, data }
            })
    }

    /// Drops all buffers.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}
