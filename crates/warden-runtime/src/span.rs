//! Source spans
//!
//! Byte-offset ranges into the script text. All rewriting is expressed in
//! terms of spans, so offsets are bytes (not chars) and always fall on UTF-8
//! boundaries of the source they were produced from.

use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)` in a source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// Create a new span
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "span start {} after end {}", start, end);
        Self { start, end }
    }

    /// Zero-width span used for synthesized nodes
    pub fn dummy() -> Self {
        Self { start: 0, end: 0 }
    }

    /// Zero-width span at `offset`
    pub fn at(offset: usize) -> Self {
        Self {
            start: offset,
            end: offset,
        }
    }

    /// Smallest span covering both `self` and `other`
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True if `offset` lies strictly between start and end
    pub fn strictly_contains(&self, offset: usize) -> bool {
        self.start < offset && offset < self.end
    }

    /// Slice the covered text out of `source`
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    /// 1-based (line, column) of the span start
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        let prefix = &source[..self.start.min(source.len())];
        let line = prefix.matches('\n').count() + 1;
        let column = match prefix.rfind('\n') {
            Some(nl) => prefix[nl + 1..].chars().count() + 1,
            None => prefix.chars().count() + 1,
        };
        (line, column)
    }
}
