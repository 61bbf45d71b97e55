//! Traversal context
//!
//! Invocation-counter snippets cannot go where the counted call is (the call
//! may sit deep inside an expression), so each call reports to the nearest
//! enclosing construct that can take a statement. That construct travels
//! down the recursion as a [`Checkpoint`].

use crate::span::Span;

/// Where snippets for calls below the current node are inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Checkpoint {
    /// In front of a statement or construct
    Before(Span),
    /// Right after a loop header or block opening
    After(Span),
    /// In front of a modifier-form body, which is parenthesized on first use:
    /// `(snippet; body) while cond`
    Wrapped(Span),
}

/// Per-node traversal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub checkpoint: Checkpoint,
    /// The node is an element of a statement list, so text can be inserted
    /// in front of it
    pub statement: bool,
}

impl Context {
    /// Context of a top-level statement
    pub fn top_level(span: Span) -> Self {
        Self {
            checkpoint: Checkpoint::Before(span),
            statement: true,
        }
    }

    /// Same checkpoint, expression position
    pub fn expression(self) -> Self {
        Self {
            statement: false,
            ..self
        }
    }

    /// Same checkpoint, statement position
    pub fn statement(self) -> Self {
        Self {
            statement: true,
            ..self
        }
    }

    pub fn with_checkpoint(self, checkpoint: Checkpoint) -> Self {
        Self { checkpoint, ..self }
    }

    /// Checkpoint for something positioned like `span`: in front of it when
    /// in statement position, otherwise the inherited one
    pub fn before_if_statement(self, span: Span) -> Checkpoint {
        if self.statement {
            Checkpoint::Before(span)
        } else {
            self.checkpoint
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_position_decides_checkpoint() {
        let outer = Span::new(0, 20);
        let inner = Span::new(4, 12);
        let ctx = Context::top_level(outer);

        assert_eq!(ctx.before_if_statement(inner), Checkpoint::Before(inner));
        assert_eq!(
            ctx.expression().before_if_statement(inner),
            Checkpoint::Before(outer)
        );
    }

    #[test]
    fn test_builders_keep_other_field() {
        let ctx = Context::top_level(Span::new(0, 1))
            .expression()
            .with_checkpoint(Checkpoint::After(Span::new(2, 3)));
        assert!(!ctx.statement);
        assert_eq!(ctx.statement().checkpoint, Checkpoint::After(Span::new(2, 3)));
    }
}
