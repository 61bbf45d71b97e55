//! Lexical analysis (tokenization)
//!
//! The lexer converts script source code into a stream of tokens with byte
//! spans. Newlines are emitted as tokens; the parser decides where they end
//! a statement.

mod literals;

use crate::diagnostic::{error_codes, Diagnostic};
use crate::span::Span;
use crate::token::{Token, TokenKind};

/// Lexer state for tokenizing source code
pub struct Lexer {
    /// Original source code
    pub(super) source: String,
    /// Characters of source code with their byte offsets
    pub(super) chars: Vec<(usize, char)>,
    /// Current position in chars
    pub(super) current: usize,
    /// Char index where the current token starts
    pub(super) start: usize,
    /// Whitespace was skipped before the current token
    pub(super) spaced: bool,
    /// Kind of the previously emitted token
    pub(super) previous: Option<TokenKind>,
    /// Collected diagnostics
    pub(super) diagnostics: Vec<Diagnostic>,
}

impl Lexer {
    /// Create a new lexer for the given source code
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let chars: Vec<(usize, char)> = source.char_indices().collect();
        Self {
            source,
            chars,
            current: 0,
            start: 0,
            spaced: false,
            previous: None,
            diagnostics: Vec::new(),
        }
    }

    /// Tokenize the source code, returning tokens and any diagnostics
    pub fn tokenize(&mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            self.previous = Some(token.kind);
            if token.kind != TokenKind::Error {
                tokens.push(token);
            }
            if is_eof {
                break;
            }
        }

        (tokens, std::mem::take(&mut self.diagnostics))
    }

    /// Scan the next token
    fn next_token(&mut self) -> Token {
        self.spaced = self.skip_whitespace_and_comments();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof, "");
        }

        let c = self.advance();

        match c {
            '\n' => self.make_token(TokenKind::Newline, "\n"),
            '(' => self.make_token(TokenKind::LeftParen, "("),
            ')' => self.make_token(TokenKind::RightParen, ")"),
            '[' => self.make_token(TokenKind::LeftBracket, "["),
            ']' => self.make_token(TokenKind::RightBracket, "]"),
            '{' => self.make_token(TokenKind::LeftBrace, "{"),
            '}' => self.make_token(TokenKind::RightBrace, "}"),
            ',' => self.make_token(TokenKind::Comma, ","),
            ';' => self.make_token(TokenKind::Semicolon, ";"),
            '~' => self.make_token(TokenKind::Tilde, "~"),
            '^' => self.make_token(TokenKind::Caret, "^"),
            '?' => self.make_token(TokenKind::Question, "?"),

            '.' => {
                if self.match_char('.') {
                    if self.match_char('.') {
                        self.make_token(TokenKind::DotDotDot, "...")
                    } else {
                        self.make_token(TokenKind::DotDot, "..")
                    }
                } else {
                    self.make_token(TokenKind::Dot, ".")
                }
            }
            '&' => {
                if self.match_char('&') {
                    if self.match_char('=') {
                        self.make_token(TokenKind::OpAssign, "&&")
                    } else {
                        self.make_token(TokenKind::AmpAmp, "&&")
                    }
                } else if self.match_char('.') {
                    self.make_token(TokenKind::SafeNav, "&.")
                } else {
                    self.make_token(TokenKind::Amp, "&")
                }
            }
            '|' => {
                if self.match_char('|') {
                    if self.match_char('=') {
                        self.make_token(TokenKind::OpAssign, "||")
                    } else {
                        self.make_token(TokenKind::PipePipe, "||")
                    }
                } else {
                    self.make_token(TokenKind::Pipe, "|")
                }
            }
            ':' => {
                if self.match_char(':') {
                    self.make_token(TokenKind::ColonColon, "::")
                } else {
                    self.symbol_or_colon()
                }
            }
            '=' => {
                if self.match_char('=') {
                    if self.match_char('=') {
                        self.make_token(TokenKind::EqualEqualEqual, "===")
                    } else {
                        self.make_token(TokenKind::EqualEqual, "==")
                    }
                } else if self.match_char('>') {
                    self.make_token(TokenKind::FatArrow, "=>")
                } else if self.match_char('~') {
                    self.make_token(TokenKind::Match, "=~")
                } else {
                    self.make_token(TokenKind::Equal, "=")
                }
            }
            '!' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::BangEqual, "!=")
                } else if self.match_char('~') {
                    self.make_token(TokenKind::NotMatch, "!~")
                } else {
                    self.make_token(TokenKind::Bang, "!")
                }
            }
            '<' => {
                if self.match_char('=') {
                    if self.match_char('>') {
                        self.make_token(TokenKind::Spaceship, "<=>")
                    } else {
                        self.make_token(TokenKind::LessEqual, "<=")
                    }
                } else if self.match_char('<') {
                    if self.match_char('=') {
                        self.make_token(TokenKind::OpAssign, "<<")
                    } else {
                        self.make_token(TokenKind::LessLess, "<<")
                    }
                } else {
                    self.make_token(TokenKind::Less, "<")
                }
            }
            '>' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::GreaterEqual, ">=")
                } else if self.match_char('>') {
                    self.make_token(TokenKind::GreaterGreater, ">>")
                } else {
                    self.make_token(TokenKind::Greater, ">")
                }
            }
            '*' => {
                if self.match_char('*') {
                    if self.match_char('=') {
                        self.make_token(TokenKind::OpAssign, "**")
                    } else {
                        self.make_token(TokenKind::StarStar, "**")
                    }
                } else {
                    self.operator_or_assign(TokenKind::Star, "*")
                }
            }
            '+' => self.operator_or_assign(TokenKind::Plus, "+"),
            '-' => self.operator_or_assign(TokenKind::Minus, "-"),
            '/' => self.operator_or_assign(TokenKind::Slash, "/"),
            '%' => self.operator_or_assign(TokenKind::Percent, "%"),

            '"' => self.double_quoted_string(),
            '\'' => self.single_quoted_string(),

            '@' => self.sigil_variable(),
            '$' => self.global_variable(),

            c if c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() || c == '_' => self.identifier(),

            _ => self.error_token(format!("Unexpected character '{}'", c)),
        }
    }

    fn operator_or_assign(&mut self, kind: TokenKind, op: &str) -> Token {
        if self.match_char('=') {
            self.make_token(TokenKind::OpAssign, op)
        } else {
            self.make_token(kind, op)
        }
    }

    /// Skip spaces, tabs, line continuations and comments. Returns whether
    /// anything was skipped. Newlines are left in place.
    fn skip_whitespace_and_comments(&mut self) -> bool {
        let mut skipped = false;
        while !self.is_at_end() {
            match self.peek() {
                ' ' | '\t' | '\r' => {
                    self.advance();
                    skipped = true;
                }
                '\\' if self.peek_next() == Some('\n') => {
                    self.advance();
                    self.advance();
                    skipped = true;
                }
                '#' => {
                    while !self.is_at_end() && self.peek() != '\n' {
                        self.advance();
                    }
                    skipped = true;
                }
                _ => break,
            }
        }
        skipped
    }

    // === Character helpers ===

    pub(super) fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }

    pub(super) fn peek(&self) -> char {
        self.chars.get(self.current).map(|&(_, c)| c).unwrap_or('\0')
    }

    pub(super) fn peek_next(&self) -> Option<char> {
        self.chars.get(self.current + 1).map(|&(_, c)| c)
    }

    pub(super) fn advance(&mut self) -> char {
        let c = self.peek();
        self.current += 1;
        c
    }

    pub(super) fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.peek() != expected {
            return false;
        }
        self.current += 1;
        true
    }

    /// Byte offset of the char at `index` (source length past the end)
    pub(super) fn offset(&self, index: usize) -> usize {
        self.chars
            .get(index)
            .map(|&(offset, _)| offset)
            .unwrap_or(self.source.len())
    }

    pub(super) fn current_span(&self) -> Span {
        Span::new(self.offset(self.start), self.offset(self.current))
    }

    pub(super) fn make_token(&self, kind: TokenKind, lexeme: &str) -> Token {
        Token::new(kind, lexeme, self.current_span(), self.spaced)
    }

    pub(super) fn error_token(&mut self, message: impl Into<String>) -> Token {
        let message = message.into();
        let span = self.current_span();
        self.diagnostics.push(
            Diagnostic::error_with_code(error_codes::LEX_ERROR, message.clone(), span)
                .with_snippet_from(&self.source),
        );
        Token::new(TokenKind::Error, message, span, self.spaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, diagnostics) = Lexer::new(source).tokenize();
        assert!(diagnostics.is_empty(), "unexpected diagnostics: {:?}", diagnostics);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_operators_and_assignments() {
        assert_eq!(
            kinds("a += 1 ||= b &&= c"),
            vec![
                TokenKind::Identifier,
                TokenKind::OpAssign,
                TokenKind::Integer,
                TokenKind::OpAssign,
                TokenKind::Identifier,
                TokenKind::OpAssign,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_spans_are_byte_offsets() {
        let (tokens, _) = Lexer::new("\"é\" + x").tokenize();
        assert_eq!(tokens[0].span, Span::new(0, 4));
        assert_eq!(tokens[1].span, Span::new(5, 6));
        assert_eq!(tokens[2].span, Span::new(7, 8));
    }

    #[test]
    fn test_comments_and_newlines() {
        assert_eq!(
            kinds("a # note\nb"),
            vec![
                TokenKind::Identifier,
                TokenKind::Newline,
                TokenKind::Identifier,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_keyword_after_dot_is_identifier() {
        assert_eq!(
            kinds("x.class"),
            vec![
                TokenKind::Identifier,
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_safe_navigation_and_scope() {
        assert_eq!(
            kinds("a&.b Foo::Bar"),
            vec![
                TokenKind::Identifier,
                TokenKind::SafeNav,
                TokenKind::Identifier,
                TokenKind::Constant,
                TokenKind::ColonColon,
                TokenKind::Constant,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unexpected_character_reports_diagnostic() {
        let (_, diagnostics) = Lexer::new("a = `ls`").tokenize();
        assert!(!diagnostics.is_empty());
        assert!(diagnostics[0].message.contains("Unexpected character"));
    }
}
