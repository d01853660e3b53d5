//! HTTP byte range requests.
//!
//! Only a single range per request is supported. `bytes=a-b`, the open
//! ended `bytes=a-` (clamped to the last byte) and the suffix form
//! `bytes=-n` are accepted. Anything else, including a multi-range set, is
//! reported as not satisfiable rather than answered with a different body.

use crate::{Error, Result};

/// A satisfiable byte range with an inclusive end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    /// Create a range, validating it against the object size.
    pub fn new(start: u64, end: u64, size: u64) -> Option<Self> {
        (start <= end && end < size).then_some(Self { start, end })
    }

    /// Parse a `Range` header value against an object of `size` bytes.
    pub fn parse(header: &str, size: u64) -> Result<Self> {
        let unsatisfiable = || Error::RangeNotSatisfiable {
            header: header.to_string(),
            size,
        };

        let set = header
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(unsatisfiable)?
            .trim();
        if set.contains(',') {
            return Err(unsatisfiable());
        }
        let (first, last) = set.split_once('-').ok_or_else(unsatisfiable)?;
        let (first, last) = (first.trim(), last.trim());

        let range = match (first.is_empty(), last.is_empty()) {
            // bytes=-n: the final n bytes
            (true, false) => {
                let suffix = parse_offset(last).ok_or_else(unsatisfiable)?;
                if suffix == 0 {
                    return Err(unsatisfiable());
                }
                Self::new(size.saturating_sub(suffix), size.saturating_sub(1), size)
            }
            (false, true) => {
                let start = parse_offset(first).ok_or_else(unsatisfiable)?;
                Self::new(start, size.saturating_sub(1), size)
            }
            (false, false) => {
                let start = parse_offset(first).ok_or_else(unsatisfiable)?;
                let end = parse_offset(last).ok_or_else(unsatisfiable)?;
                Self::new(start, end, size)
            }
            (true, true) => None,
        };

        range.ok_or_else(unsatisfiable)
    }

    /// First byte offset.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last byte offset (inclusive).
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Offset one past the last byte.
    pub fn end_exclusive(&self) -> u64 {
        self.end + 1
    }

    /// Number of bytes in the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Ranges are never empty; provided for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Content-Range` header value for a 206 response.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// `Content-Range` header value for a 416 response.
pub fn unsatisfied_content_range(size: u64) -> String {
    format!("bytes */{size}")
}

fn parse_offset(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
