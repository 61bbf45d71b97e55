//! Token types for lexical analysis
//!
//! Defines all token types recognized by the script lexer.

use crate::span::Span;
use serde::{Deserialize, Serialize};

/// Token type produced by the lexer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The source text of this token (unescaped value for strings, bare name
    /// for symbols and labels)
    pub lexeme: String,
    /// Source location
    pub span: Span,
    /// Whitespace precedes this token on the same line
    pub spaced: bool,
}

impl Token {
    /// Create a new token
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, span: Span, spaced: bool) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            span,
            spaced,
        }
    }
}

/// Classification of token types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    // Literals
    /// Integer literal (42)
    Integer,
    /// Float literal (3.14)
    Float,
    /// String literal ("hello", 'hello')
    String,
    /// Symbol literal (:name, :+)
    Symbol,
    /// Local name or method name (foo, empty?, save!)
    Identifier,
    /// Capitalized name (Foo)
    Constant,
    /// `@name`
    Ivar,
    /// `@@name`
    Cvar,
    /// `$name`
    Gvar,
    /// `name:` in a hash or argument list
    Label,

    // Keywords
    Def,
    Class,
    Module,
    If,
    Elsif,
    Else,
    Unless,
    Then,
    End,
    While,
    Until,
    For,
    In,
    Do,
    Begin,
    Return,
    Yield,
    Break,
    Next,
    Redo,
    Retry,
    SelfKw,
    Nil,
    True,
    False,
    And,
    Or,
    Not,

    // Punctuation
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Semicolon,
    Newline,
    Dot,
    /// `&.`
    SafeNav,
    /// `::`
    ColonColon,
    /// `:` (ternary)
    Colon,
    /// `=>`
    FatArrow,
    /// `|`
    Pipe,
    /// `?` (ternary)
    Question,

    // Operators
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    EqualEqual,
    EqualEqualEqual,
    BangEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Spaceship,
    Match,
    NotMatch,
    Bang,
    Tilde,
    AmpAmp,
    PipePipe,
    Amp,
    Caret,
    LessLess,
    GreaterGreater,
    DotDot,
    DotDotDot,
    Equal,
    /// `+=`, `-=`, `*=`, `/=`, `||=`, `&&=`, ...; lexeme holds the operator
    OpAssign,

    // Special
    /// Lexing error (lexeme holds the message)
    Error,
    /// End of file
    Eof,
}

impl TokenKind {
    /// Check if an identifier is a keyword
    pub fn is_keyword(s: &str) -> Option<TokenKind> {
        match s {
            "def" => Some(TokenKind::Def),
            "class" => Some(TokenKind::Class),
            "module" => Some(TokenKind::Module),
            "if" => Some(TokenKind::If),
            "elsif" => Some(TokenKind::Elsif),
            "else" => Some(TokenKind::Else),
            "unless" => Some(TokenKind::Unless),
            "then" => Some(TokenKind::Then),
            "end" => Some(TokenKind::End),
            "while" => Some(TokenKind::While),
            "until" => Some(TokenKind::Until),
            "for" => Some(TokenKind::For),
            "in" => Some(TokenKind::In),
            "do" => Some(TokenKind::Do),
            "begin" => Some(TokenKind::Begin),
            "return" => Some(TokenKind::Return),
            "yield" => Some(TokenKind::Yield),
            "break" => Some(TokenKind::Break),
            "next" => Some(TokenKind::Next),
            "redo" => Some(TokenKind::Redo),
            "retry" => Some(TokenKind::Retry),
            "self" => Some(TokenKind::SelfKw),
            "nil" => Some(TokenKind::Nil),
            "true" => Some(TokenKind::True),
            "false" => Some(TokenKind::False),
            "and" => Some(TokenKind::And),
            "or" => Some(TokenKind::Or),
            "not" => Some(TokenKind::Not),
            _ => None,
        }
    }

    /// Binary operator tokens that name a method (`a + b` calls `+` on `a`)
    pub fn operator_method(&self) -> Option<&'static str> {
        match self {
            TokenKind::Plus => Some("+"),
            TokenKind::Minus => Some("-"),
            TokenKind::Star => Some("*"),
            TokenKind::StarStar => Some("**"),
            TokenKind::Slash => Some("/"),
            TokenKind::Percent => Some("%"),
            TokenKind::EqualEqual => Some("=="),
            TokenKind::EqualEqualEqual => Some("==="),
            TokenKind::BangEqual => Some("!="),
            TokenKind::Less => Some("<"),
            TokenKind::LessEqual => Some("<="),
            TokenKind::Greater => Some(">"),
            TokenKind::GreaterEqual => Some(">="),
            TokenKind::Spaceship => Some("<=>"),
            TokenKind::Match => Some("=~"),
            TokenKind::NotMatch => Some("!~"),
            TokenKind::Amp => Some("&"),
            TokenKind::Pipe => Some("|"),
            TokenKind::Caret => Some("^"),
            TokenKind::LessLess => Some("<<"),
            TokenKind::GreaterGreater => Some(">>"),
            _ => None,
        }
    }

    /// Tokens that end a statement
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(TokenKind::is_keyword("def"), Some(TokenKind::Def));
        assert_eq!(TokenKind::is_keyword("self"), Some(TokenKind::SelfKw));
        assert_eq!(TokenKind::is_keyword("define"), None);
    }

    #[test]
    fn test_operator_methods() {
        assert_eq!(TokenKind::LessLess.operator_method(), Some("<<"));
        assert_eq!(TokenKind::AmpAmp.operator_method(), None);
    }
}
