//! Literal scanning for the lexer

use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

/// Operator method names that may follow `:` in a symbol, longest first
const OPERATOR_SYMBOLS: &[&str] = &[
    "[]=", "===", "<=>", "[]", "==", "=~", "!=", "!~", "**", "<<", ">>", "<=", ">=", "+@", "-@",
    "+", "-", "*", "/", "%", "<", ">", "!", "&", "|", "^", "~",
];

impl Lexer {
    /// Scan a double-quoted string literal
    pub(super) fn double_quoted_string(&mut self) -> Token {
        let mut value = String::new();
        let mut error_token = None;

        while !self.is_at_end() && self.peek() != '"' {
            let c = self.advance();
            match c {
                '#' if matches!(self.peek(), '{' | '@' | '$') => {
                    if error_token.is_none() {
                        error_token = Some(self.error_token("String interpolation is not supported"));
                    }
                }
                '\\' => {
                    if self.is_at_end() {
                        return self.error_token("Unterminated string");
                    }
                    let escape_char = self.advance();
                    let escaped = match escape_char {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        's' => ' ',
                        '0' => '\0',
                        'e' => '\x1b',
                        '\\' => '\\',
                        '"' => '"',
                        '#' => '#',
                        '\n' => continue,
                        _ => {
                            if error_token.is_none() {
                                error_token = Some(self.error_token(format!(
                                    "Invalid escape sequence '\\{}'",
                                    escape_char
                                )));
                            }
                            continue;
                        }
                    };
                    value.push(escaped);
                }
                _ => value.push(c),
            }
        }

        if self.is_at_end() {
            return self.error_token("Unterminated string");
        }

        self.advance(); // closing "

        match error_token {
            Some(err) => err,
            None => self.make_token(TokenKind::String, &value),
        }
    }

    /// Scan a single-quoted string literal. Only `\'` and `\\` are escapes.
    pub(super) fn single_quoted_string(&mut self) -> Token {
        let mut value = String::new();

        while !self.is_at_end() && self.peek() != '\'' {
            let c = self.advance();
            if c == '\\' && matches!(self.peek(), '\'' | '\\') {
                value.push(self.advance());
            } else {
                value.push(c);
            }
        }

        if self.is_at_end() {
            return self.error_token("Unterminated string");
        }

        self.advance(); // closing '
        self.make_token(TokenKind::String, &value)
    }

    /// Scan an integer or float literal. Underscore separators are dropped
    /// from the lexeme.
    pub(super) fn number(&mut self) -> Token {
        let mut kind = TokenKind::Integer;

        self.digits();

        if self.peek() == '.' && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            kind = TokenKind::Float;
            self.advance(); // consume .
            self.digits();
        }

        if matches!(self.peek(), 'e' | 'E') {
            let next = self.peek_next();
            let signed = matches!(next, Some('+') | Some('-'));
            let exponent_follows = if signed {
                self.chars
                    .get(self.current + 2)
                    .is_some_and(|&(_, c)| c.is_ascii_digit())
            } else {
                next.is_some_and(|c| c.is_ascii_digit())
            };
            if exponent_follows {
                kind = TokenKind::Float;
                self.advance(); // e
                if signed {
                    self.advance();
                }
                self.digits();
            }
        }

        let lexeme: String = self.slice(self.start, self.current).replace('_', "");
        self.make_token(kind, &lexeme)
    }

    fn digits(&mut self) {
        while !self.is_at_end() {
            let c = self.peek();
            let separator = c == '_' && self.peek_next().is_some_and(|n| n.is_ascii_digit());
            if c.is_ascii_digit() || separator {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Scan an identifier, constant, keyword or label
    pub(super) fn identifier(&mut self) -> Token {
        self.word();

        let first = self.chars[self.start].1;
        let is_constant = first.is_uppercase();

        // Predicate and bang method names: empty?, save!
        if !is_constant && matches!(self.peek(), '?' | '!') {
            let next = self.peek_next();
            let is_operator = next == Some('=') && self.chars.get(self.current + 2).map(|&(_, c)| c) != Some('=');
            if !is_operator {
                self.advance();
            }
        }

        let lexeme = self.slice(self.start, self.current);

        // `name:` label, but not `Foo::Bar`
        if self.peek() == ':' && self.peek_next() != Some(':') {
            self.advance();
            return self.make_token(TokenKind::Label, &lexeme);
        }

        let after_dot = matches!(
            self.previous,
            Some(TokenKind::Dot) | Some(TokenKind::SafeNav)
        );
        let kind = if after_dot {
            TokenKind::Identifier
        } else if let Some(keyword) = TokenKind::is_keyword(&lexeme) {
            keyword
        } else if is_constant {
            TokenKind::Constant
        } else {
            TokenKind::Identifier
        };

        self.make_token(kind, &lexeme)
    }

    /// After a single `:`, scan a symbol literal, or emit a bare colon
    pub(super) fn symbol_or_colon(&mut self) -> Token {
        let c = self.peek();

        if c.is_alphabetic() || c == '_' {
            let name_start = self.current;
            self.word();
            if matches!(self.peek(), '?' | '!') {
                self.advance();
            } else if self.peek() == '='
                && !matches!(self.peek_next(), Some('=') | Some('>') | Some('~'))
            {
                self.advance();
            }
            let name = self.slice(name_start, self.current);
            return self.make_token(TokenKind::Symbol, &name);
        }

        if c == '"' {
            self.advance();
            let token = self.double_quoted_string();
            if token.kind == TokenKind::Error {
                return token;
            }
            return self.make_token(TokenKind::Symbol, &token.lexeme);
        }

        let rest = self.slice(self.current, self.chars.len());
        for op in OPERATOR_SYMBOLS {
            if rest.starts_with(op) {
                self.current += op.chars().count();
                return self.make_token(TokenKind::Symbol, op);
            }
        }

        self.make_token(TokenKind::Colon, ":")
    }

    /// Scan `@name` or `@@name`
    pub(super) fn sigil_variable(&mut self) -> Token {
        let kind = if self.match_char('@') {
            TokenKind::Cvar
        } else {
            TokenKind::Ivar
        };
        if !(self.peek().is_alphabetic() || self.peek() == '_') {
            return self.error_token("Expected a name after '@'");
        }
        self.word();
        let lexeme = self.slice(self.start, self.current);
        self.make_token(kind, &lexeme)
    }

    /// Scan `$name`
    pub(super) fn global_variable(&mut self) -> Token {
        if !(self.peek().is_alphanumeric() || self.peek() == '_') {
            return self.error_token("Expected a name after '$'");
        }
        self.word();
        let lexeme = self.slice(self.start, self.current);
        self.make_token(TokenKind::Gvar, &lexeme)
    }

    fn word(&mut self) {
        while !self.is_at_end() {
            let c = self.peek();
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Source text between two char indices
    fn slice(&self, from: usize, to: usize) -> String {
        self.source[self.offset(from)..self.offset(to)].to_string()
    }
}

#[cfg(test)]
mod tests {
    use crate::lexer::Lexer;
    use crate::token::TokenKind;

    fn single(source: &str) -> (TokenKind, String) {
        let (tokens, diagnostics) = Lexer::new(source).tokenize();
        assert!(diagnostics.is_empty(), "unexpected diagnostics: {:?}", diagnostics);
        (tokens[0].kind, tokens[0].lexeme.clone())
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(single(r#""a\tb\n""#), (TokenKind::String, "a\tb\n".to_string()));
        assert_eq!(single(r"'a\nb'"), (TokenKind::String, "a\\nb".to_string()));
    }

    #[test]
    fn test_interpolation_is_rejected() {
        let (_, diagnostics) = Lexer::new(r#""hi #{name}""#).tokenize();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("interpolation"));
    }

    #[test]
    fn test_unterminated_string() {
        let (_, diagnostics) = Lexer::new("\"abc").tokenize();
        assert!(diagnostics[0].message.contains("Unterminated"));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(single("1_000"), (TokenKind::Integer, "1000".to_string()));
        assert_eq!(single("3.25"), (TokenKind::Float, "3.25".to_string()));
        assert_eq!(single("2e3"), (TokenKind::Float, "2e3".to_string()));
    }

    #[test]
    fn test_range_is_not_a_float() {
        let (tokens, _) = Lexer::new("1..5").tokenize();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Integer,
                TokenKind::DotDot,
                TokenKind::Integer,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_symbols() {
        assert_eq!(single(":name"), (TokenKind::Symbol, "name".to_string()));
        assert_eq!(single(":empty?"), (TokenKind::Symbol, "empty?".to_string()));
        assert_eq!(single(":+"), (TokenKind::Symbol, "+".to_string()));
        assert_eq!(single(":[]="), (TokenKind::Symbol, "[]=".to_string()));
        assert_eq!(single(":\"odd name\""), (TokenKind::Symbol, "odd name".to_string()));
    }

    #[test]
    fn test_identifier_suffixes_and_labels() {
        assert_eq!(single("empty?"), (TokenKind::Identifier, "empty?".to_string()));
        assert_eq!(single("save!"), (TokenKind::Identifier, "save!".to_string()));
        assert_eq!(single("key: 1"), (TokenKind::Label, "key".to_string()));
        assert_eq!(single("Foo"), (TokenKind::Constant, "Foo".to_string()));
    }

    #[test]
    fn test_not_equal_after_identifier() {
        let (tokens, _) = Lexer::new("a!=b").tokenize();
        assert_eq!(tokens[0].lexeme, "a");
        assert_eq!(tokens[1].kind, TokenKind::BangEqual);
    }

    #[test]
    fn test_variables_with_sigils() {
        assert_eq!(single("@x"), (TokenKind::Ivar, "@x".to_string()));
        assert_eq!(single("@@count"), (TokenKind::Cvar, "@@count".to_string()));
        assert_eq!(single("$stdout"), (TokenKind::Gvar, "$stdout".to_string()));
    }
}
