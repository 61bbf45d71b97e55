//! Text edit merging
//!
//! The rewriter schedules edits against spans of the original source while
//! it walks the tree. Several edits may target the same offset (a wrapper
//! around a call argument and the counter snippet of the statement holding
//! it start at the same byte), so rendering follows fixed rules:
//!
//! - edits with the same span and kind are merged into one, texts joined in
//!   the order they were scheduled;
//! - at one offset, insert-after texts of ranges ending there come first
//!   (narrower range first), then insert-before texts of ranges starting
//!   there (wider range first), then the replacement starting there;
//! - replacing a span twice, replacing two spans from the same offset, or
//!   any anchor strictly inside a replaced span is an [`EditError`].
//!
//! Edits are applied right to left so earlier offsets stay valid.

use crate::span::Span;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EditKind {
    InsertBefore,
    InsertAfter,
    Replace,
}

/// One scheduled edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub span: Span,
    pub kind: EditKind,
    pub text: String,
}

impl Edit {
    /// Offset the edit acts on
    fn anchor(&self) -> usize {
        match self.kind {
            EditKind::InsertBefore | EditKind::Replace => self.span.start,
            EditKind::InsertAfter => self.span.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("span {}..{} replaced twice", .span.start, .span.end)]
    DuplicateReplace { span: Span },

    #[error("edit at offset {offset} falls inside replaced span {}..{}", .span.start, .span.end)]
    InsideReplace { span: Span, offset: usize },

    #[error("span {}..{} is outside the source ({len} bytes)", .span.start, .span.end)]
    OutOfBounds { span: Span, len: usize },

    #[error("spans {}..{} and {}..{} are both replaced from offset {}", .first.start, .first.end, .second.start, .second.end, .first.start)]
    SharedReplaceStart { first: Span, second: Span },
}

impl EditError {
    /// Span the conflict was found on
    pub fn span(&self) -> Span {
        match self {
            EditError::DuplicateReplace { span }
            | EditError::InsideReplace { span, .. }
            | EditError::OutOfBounds { span, .. } => *span,
            EditError::SharedReplaceStart { first, .. } => *first,
        }
    }
}

/// Ordered collection of scheduled edits
#[derive(Debug, Clone, Default)]
pub struct EditSet {
    edits: Vec<Edit>,
    index: HashMap<(Span, EditKind), usize>,
    duplicate_replace: Option<Span>,
}

impl EditSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_before(&mut self, span: Span, text: impl Into<String>) {
        self.push(span, EditKind::InsertBefore, text.into());
    }

    pub fn insert_after(&mut self, span: Span, text: impl Into<String>) {
        self.push(span, EditKind::InsertAfter, text.into());
    }

    pub fn replace(&mut self, span: Span, text: impl Into<String>) {
        self.push(span, EditKind::Replace, text.into());
    }

    pub fn remove(&mut self, span: Span) {
        self.replace(span, "");
    }

    fn push(&mut self, span: Span, kind: EditKind, text: String) {
        if text.is_empty() && kind != EditKind::Replace {
            return;
        }
        match self.index.get(&(span, kind)) {
            // Reported by `check`
            Some(_) if kind == EditKind::Replace => {
                self.duplicate_replace.get_or_insert(span);
            }
            Some(&slot) => self.edits[slot].text.push_str(&text),
            None => {
                self.index.insert((span, kind), self.edits.len());
                self.edits.push(Edit { span, kind, text });
            }
        }
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Merged edits in scheduling order of their first text
    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    /// Check the edit set for conflicting replacements
    pub fn check(&self) -> Result<(), EditError> {
        if let Some(span) = self.duplicate_replace {
            return Err(EditError::DuplicateReplace { span });
        }
        let mut starts: HashMap<usize, Span> = HashMap::new();
        for replaced in self.edits.iter().filter(|e| e.kind == EditKind::Replace) {
            if let Some(&first) = starts.get(&replaced.span.start) {
                return Err(EditError::SharedReplaceStart {
                    first,
                    second: replaced.span,
                });
            }
            starts.insert(replaced.span.start, replaced.span);
        }
        for replaced in self.edits.iter().filter(|e| e.kind == EditKind::Replace) {
            for other in &self.edits {
                if std::ptr::eq(other, replaced) {
                    continue;
                }
                let offsets = match other.kind {
                    EditKind::Replace => vec![other.span.start, other.span.end],
                    _ => vec![other.anchor()],
                };
                if let Some(&offset) = offsets
                    .iter()
                    .find(|&&offset| replaced.span.strictly_contains(offset))
                {
                    return Err(EditError::InsideReplace {
                        span: replaced.span,
                        offset,
                    });
                }
            }
        }
        Ok(())
    }

    /// Render the edits into `source`
    pub fn apply(&self, source: &str) -> Result<String, EditError> {
        self.apply_with_prelude(source, 0, "")
    }

    /// Render the edits and insert `prelude` at `offset` ahead of every
    /// other edit at that offset
    pub fn apply_with_prelude(
        &self,
        source: &str,
        offset: usize,
        prelude: &str,
    ) -> Result<String, EditError> {
        self.check()?;
        for edit in &self.edits {
            if edit.span.end > source.len() {
                return Err(EditError::OutOfBounds {
                    span: edit.span,
                    len: source.len(),
                });
            }
        }
        if offset > source.len() {
            return Err(EditError::OutOfBounds {
                span: Span::at(offset),
                len: source.len(),
            });
        }

        let mut points: BTreeMap<usize, Point<'_>> = BTreeMap::new();
        for edit in &self.edits {
            let point = points.entry(edit.anchor()).or_default();
            match edit.kind {
                EditKind::InsertAfter => point.after.push(edit),
                EditKind::InsertBefore => point.before.push(edit),
                EditKind::Replace => point.replace = Some(edit),
            }
        }
        if !prelude.is_empty() {
            points.entry(offset).or_default().prelude = prelude;
        }

        let mut output = source.to_string();
        for (&at, point) in points.iter_mut().rev() {
            let (text, end) = point.render(at);
            output.replace_range(at..end, &text);
        }
        Ok(output)
    }
}

/// Everything that happens at one offset
#[derive(Default)]
struct Point<'a> {
    prelude: &'a str,
    after: Vec<&'a Edit>,
    before: Vec<&'a Edit>,
    replace: Option<&'a Edit>,
}

impl Point<'_> {
    /// Combined text and the end of the source range it replaces
    fn render(&mut self, at: usize) -> (String, usize) {
        // Stable sorts keep scheduling order among equal widths
        self.after.sort_by_key(|edit| edit.span.len());
        self.before.sort_by_key(|edit| std::cmp::Reverse(edit.span.len()));

        let mut text = String::from(self.prelude);
        for edit in self.after.iter().chain(self.before.iter()) {
            text.push_str(&edit.text);
        }
        let end = match self.replace {
            Some(edit) => {
                text.push_str(&edit.text);
                edit.span.end
            }
            None => at,
        };
        (text, end)
    }
}
