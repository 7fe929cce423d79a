// Copyright (c) 2026-present, the alt-cache authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{headers::HttpHeader, vector::AltVector};

/// HTTP-aware alternate selection.
///
/// Ranks the vector's alternates against a request and returns the index
/// of the best match. A pure function over headers; the HTTP front end
/// supplies the implementation.
pub trait AltSelect {
    /// Index of the alternate matching `request`, or `None` on miss.
    fn select(&self, vector: &AltVector, request: &HttpHeader) -> Option<usize>;
}
