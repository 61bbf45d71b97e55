//! Parsing (tokens to AST)
//!
//! The parser converts a stream of tokens into an Abstract Syntax Tree (AST).
//! Uses Pratt parsing for expressions and recursive descent for statements.
//!
//! Whether a bare identifier is a local variable read or a method call is a
//! parse-time decision: names assigned earlier in the enclosing scope (method
//! and block parameters included) are locals, everything else is a call.

mod expr;
mod stmt;

use std::collections::HashSet;

use thiserror::Error;

use crate::ast::*;
use crate::diagnostic::{error_codes, Diagnostic};
use crate::lexer::Lexer;
use crate::span::Span;
use crate::token::{Token, TokenKind};

/// A script could not be parsed
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", .diagnostic.message)]
pub struct SyntaxError {
    pub diagnostic: Diagnostic,
}

impl SyntaxError {
    pub fn message(&self) -> &str {
        &self.diagnostic.message
    }
}

/// Turns script text into a syntax tree
///
/// The rewriter only depends on this seam; hosts with their own front end
/// can plug it in through `rewrite_with`.
pub trait ScriptParser {
    fn parse(&self, source: &str) -> Result<Program, SyntaxError>;
}

/// Parser for the built-in script dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct RubyParser;

impl ScriptParser for RubyParser {
    fn parse(&self, source: &str) -> Result<Program, SyntaxError> {
        let (tokens, lex_diagnostics) = Lexer::new(source).tokenize();
        if let Some(diagnostic) = lex_diagnostics.into_iter().next() {
            return Err(SyntaxError { diagnostic });
        }

        let mut parser = Parser::new(tokens, source);
        let (program, diagnostics) = parser.parse();
        match diagnostics.into_iter().next() {
            Some(diagnostic) => Err(SyntaxError { diagnostic }),
            None => Ok(program),
        }
    }
}

/// Local variable scope. Method, class and module bodies are hard scopes
/// that hide outer locals; blocks see through to their parent.
#[derive(Debug, Default)]
struct Scope {
    locals: HashSet<String>,
    hard: bool,
}

/// Parser state for building AST from tokens
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    source: String,
    diagnostics: Vec<Diagnostic>,
    next_id: u32,
    scopes: Vec<Scope>,
    /// `do` may open a block for the call being parsed; cleared while parsing
    /// loop conditions and command arguments, where `do` belongs elsewhere
    do_allowed: bool,
}

/// Operator precedence levels for Pratt parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Assignment, // = op=
    Ternary,    // ?:
    Range,      // .. ...
    OrOr,       // ||
    AndAnd,     // &&
    Equality,   // <=> == === != =~ !~
    Comparison, // < <= > >=
    BitOr,      // | ^
    BitAnd,     // &
    Shift,      // << >>
    Term,       // + -
    Factor,     // * / %
    UnaryMinus, // -x
    Power,      // **
    Unary,      // ! ~ +x
    Call,       // . &. :: []
}

impl Precedence {
    /// The next lower level, used for right-associative operators
    fn lower(self) -> Precedence {
        match self {
            Precedence::Lowest | Precedence::Assignment => Precedence::Lowest,
            Precedence::Ternary => Precedence::Assignment,
            Precedence::Range => Precedence::Ternary,
            Precedence::OrOr => Precedence::Range,
            Precedence::AndAnd => Precedence::OrOr,
            Precedence::Equality => Precedence::AndAnd,
            Precedence::Comparison => Precedence::Equality,
            Precedence::BitOr => Precedence::Comparison,
            Precedence::BitAnd => Precedence::BitOr,
            Precedence::Shift => Precedence::BitAnd,
            Precedence::Term => Precedence::Shift,
            Precedence::Factor => Precedence::Term,
            Precedence::UnaryMinus => Precedence::Factor,
            Precedence::Power => Precedence::UnaryMinus,
            Precedence::Unary => Precedence::Power,
            Precedence::Call => Precedence::Unary,
        }
    }
}

impl Parser {
    /// Create a new parser for the given tokens. `source` is the text the
    /// tokens were produced from and is only used for diagnostics.
    pub fn new(tokens: Vec<Token>, source: impl Into<String>) -> Self {
        let mut tokens = tokens;
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let end = tokens.last().map(|t| t.span.end).unwrap_or(0);
            tokens.push(Token::new(TokenKind::Eof, "", Span::at(end), false));
        }
        Self {
            tokens,
            current: 0,
            source: source.into(),
            diagnostics: Vec::new(),
            next_id: 0,
            scopes: vec![Scope::default()],
            do_allowed: true,
        }
    }

    /// Parse tokens into an AST
    pub fn parse(&mut self) -> (Program, Vec<Diagnostic>) {
        let mut statements = Vec::new();

        loop {
            self.skip_terminators();
            if self.is_at_end() {
                break;
            }
            match self.parse_statement().and_then(|stmt| {
                self.expect_statement_end(&[])?;
                Ok(stmt)
            }) {
                Ok(stmt) => statements.push(stmt),
                Err(_) => self.synchronize(),
            }
        }

        let span = Span::new(0, self.source.len());
        (
            Program { statements, span },
            std::mem::take(&mut self.diagnostics),
        )
    }

    // === Node construction ===

    pub(super) fn node(&mut self, kind: NodeKind, span: Span) -> Node {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        Node { id, kind, span }
    }

    /// Collapse a statement list into a single body node
    pub(super) fn body(&mut self, mut statements: Vec<Node>) -> Option<Box<Node>> {
        match statements.len() {
            0 => None,
            1 => statements.pop().map(Box::new),
            _ => {
                let span = statements[0]
                    .span
                    .merge(statements[statements.len() - 1].span);
                Some(Box::new(self.node(NodeKind::Begin(statements), span)))
            }
        }
    }

    // === Scopes ===

    pub(super) fn push_scope(&mut self, hard: bool) {
        self.scopes.push(Scope {
            locals: HashSet::new(),
            hard,
        });
    }

    pub(super) fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub(super) fn declare_local(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.locals.insert(name.to_string());
        }
    }

    pub(super) fn is_local(&self, name: &str) -> bool {
        for scope in self.scopes.iter().rev() {
            if scope.locals.contains(name) {
                return true;
            }
            if scope.hard {
                return false;
            }
        }
        false
    }

    /// Run `f` with `do` blocks enabled or disabled, restoring the previous
    /// setting afterwards
    pub(super) fn with_do_allowed<T>(
        &mut self,
        allowed: bool,
        f: impl FnOnce(&mut Self) -> Result<T, ()>,
    ) -> Result<T, ()> {
        let saved = self.do_allowed;
        self.do_allowed = allowed;
        let result = f(self);
        self.do_allowed = saved;
        result
    }

    // === Helper methods ===

    /// Advance to next token and return reference to previous
    pub(super) fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[self.current - 1]
    }

    /// Peek at current token
    pub(super) fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    /// Peek one token past the current one
    pub(super) fn peek_next(&self) -> &Token {
        let index = (self.current + 1).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    /// Token just consumed
    pub(super) fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    /// Check if current token matches kind
    pub(super) fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    /// Match and consume token if it matches
    pub(super) fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume token of given kind or error
    pub(super) fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, ()> {
        if self.check(kind) {
            Ok(self.advance().clone())
        } else {
            self.error(message);
            Err(())
        }
    }

    /// Check if at end of token stream
    pub(super) fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    pub(super) fn skip_newlines(&mut self) {
        while self.check(TokenKind::Newline) {
            self.advance();
        }
    }

    pub(super) fn skip_terminators(&mut self) {
        while self.check(TokenKind::Newline) || self.check(TokenKind::Semicolon) {
            self.advance();
        }
    }

    /// Record an error at the current token
    pub(super) fn error(&mut self, message: &str) {
        let token = self.peek();
        let (code, span) = if token.kind == TokenKind::Eof {
            (error_codes::UNEXPECTED_EOF, token.span)
        } else {
            (error_codes::UNEXPECTED_TOKEN, token.span)
        };
        self.error_at(code, message, span);
    }

    pub(super) fn error_at(&mut self, code: &str, message: &str, span: Span) {
        self.diagnostics.push(
            Diagnostic::error_with_code(code, message, span)
                .with_snippet_from(&self.source)
                .with_label("syntax error"),
        );
    }

    /// Skip to the start of the next statement after an error
    fn synchronize(&mut self) {
        while !self.is_at_end() {
            if self.peek().kind.is_terminator() {
                self.advance();
                return;
            }
            self.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        RubyParser.parse(source).unwrap()
    }

    #[test]
    fn test_node_ids_are_unique() {
        let program = parse("a = 1\nb = [a, 2]\nputs(b)");
        let mut seen = HashSet::new();
        let mut stack: Vec<&Node> = program.statements.iter().collect();
        while let Some(node) = stack.pop() {
            assert!(seen.insert(node.id), "duplicate id {:?}", node.id);
            stack.extend(node.children());
        }
        assert!(seen.len() >= 7);
    }

    #[test]
    fn test_lexer_error_becomes_syntax_error() {
        let err = RubyParser.parse("x = \"#{y}\"").unwrap_err();
        assert!(err.message().contains("interpolation"));
    }

    #[test]
    fn test_parser_error_becomes_syntax_error() {
        let err = RubyParser.parse("foo(1, 2").unwrap_err();
        assert_eq!(err.diagnostic.code, error_codes::UNEXPECTED_EOF);
    }

    #[test]
    fn test_locals_scoping() {
        let program = parse("x = 1\ndef m\n  x\nend\n[1].each { |y| x + y }");
        let def_body = match &program.statements[1].kind {
            NodeKind::Def { body: Some(body), .. } => body,
            other => panic!("expected def, got {:?}", other),
        };
        // Method bodies do not see outer locals
        assert!(matches!(def_body.kind, NodeKind::Send { .. }));

        let block_body = match &program.statements[2].kind {
            NodeKind::Block { body: Some(body), .. } => body,
            other => panic!("expected block, got {:?}", other),
        };
        let receiver = match &block_body.kind {
            NodeKind::Send { receiver: Some(r), .. } => r,
            other => panic!("expected send, got {:?}", other),
        };
        // Blocks do
        assert_eq!(receiver.kind, NodeKind::Lvar("x".to_string()));
    }
}
