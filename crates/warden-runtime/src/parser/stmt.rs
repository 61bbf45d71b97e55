//! Statement parsing
//!
//! Statement sequences, modifiers and the keyword constructs (conditionals,
//! loops, definitions, jumps).

use super::Parser;
use crate::ast::{Node, NodeKind};
use crate::diagnostic::error_codes;
use crate::span::Span;
use crate::token::TokenKind;

/// Names the lexer passes through as identifiers but the dialect rejects
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "case", "when", "rescue", "ensure", "alias", "undef", "BEGIN", "END",
];

impl Parser {
    /// Parse statements until one of `terminators` (not consumed) or end of
    /// input
    pub(super) fn parse_statements(&mut self, terminators: &[TokenKind]) -> Result<Vec<Node>, ()> {
        let mut statements = Vec::new();
        loop {
            self.skip_terminators();
            if self.is_at_end() || terminators.contains(&self.peek().kind) {
                break;
            }
            let statement = self.parse_statement()?;
            self.expect_statement_end(terminators)?;
            statements.push(statement);
        }
        Ok(statements)
    }

    pub(super) fn expect_statement_end(&mut self, terminators: &[TokenKind]) -> Result<(), ()> {
        let kind = self.peek().kind;
        if kind.is_terminator() || terminators.contains(&kind) {
            Ok(())
        } else {
            self.error(&format!(
                "Expected newline or ';' after statement, found '{}'",
                self.peek().lexeme
            ));
            Err(())
        }
    }

    /// Parse a statement, including trailing `if`/`unless`/`while`/`until`
    /// modifiers
    pub(super) fn parse_statement(&mut self) -> Result<Node, ()> {
        self.reject_unsupported_keyword()?;
        let mut node = self.parse_expression_statement()?;

        loop {
            let token = self.peek().clone();
            match token.kind {
                TokenKind::If | TokenKind::Unless => {
                    self.advance();
                    let cond = self.parse_expression_statement()?;
                    let span = node.span.merge(cond.span);
                    let (then_branch, else_branch) = if token.kind == TokenKind::If {
                        (Some(Box::new(node)), None)
                    } else {
                        (None, Some(Box::new(node)))
                    };
                    node = self.node(
                        NodeKind::If {
                            cond: Box::new(cond),
                            then_branch,
                            else_branch,
                        },
                        span,
                    );
                }
                TokenKind::While | TokenKind::Until => {
                    self.advance();
                    let cond = self.parse_expression_statement()?;
                    let span = node.span.merge(cond.span);
                    let cond = Box::new(cond);
                    let body = Some(Box::new(node));
                    let kind = if token.kind == TokenKind::While {
                        NodeKind::While {
                            cond,
                            body,
                            do_keyword: None,
                        }
                    } else {
                        NodeKind::Until {
                            cond,
                            body,
                            do_keyword: None,
                        }
                    };
                    node = self.node(kind, span);
                }
                TokenKind::Identifier if token.lexeme == "rescue" => {
                    self.reject_unsupported_keyword()?;
                }
                _ => break,
            }
        }

        Ok(node)
    }

    fn reject_unsupported_keyword(&mut self) -> Result<(), ()> {
        let token = self.peek();
        if token.kind == TokenKind::Identifier && UNSUPPORTED_KEYWORDS.contains(&token.lexeme.as_str())
        {
            let message = format!("'{}' is not supported", token.lexeme);
            let span = token.span;
            self.error_at(error_codes::UNSUPPORTED_SYNTAX, &message, span);
            return Err(());
        }
        Ok(())
    }

    /// `and` / `or` chains over `not` expressions
    fn parse_expression_statement(&mut self) -> Result<Node, ()> {
        let mut left = self.parse_not_expression()?;
        loop {
            let kind = self.peek().kind;
            if kind != TokenKind::And && kind != TokenKind::Or {
                break;
            }
            self.advance();
            self.skip_newlines();
            let right = self.parse_not_expression()?;
            let span = left.span.merge(right.span);
            let (l, r) = (Box::new(left), Box::new(right));
            let node_kind = if kind == TokenKind::And {
                NodeKind::And { left: l, right: r }
            } else {
                NodeKind::Or { left: l, right: r }
            };
            left = self.node(node_kind, span);
        }
        Ok(left)
    }

    fn parse_not_expression(&mut self) -> Result<Node, ()> {
        if self.check(TokenKind::Not) {
            let not = self.advance().span;
            let operand = self.parse_not_expression()?;
            let span = not.merge(operand.span);
            return Ok(self.node(
                NodeKind::Send {
                    receiver: Some(Box::new(operand)),
                    method: "!".to_string(),
                    args: Vec::new(),
                    safe_nav: false,
                    selector: not,
                },
                span,
            ));
        }
        self.parse_expression()
    }

    // === Conditionals ===

    pub(super) fn parse_if(&mut self) -> Result<Node, ()> {
        let keyword = self.advance().span;
        self.parse_if_rest(keyword)
    }

    /// Condition, branches and `end` of an `if` or `elsif`
    fn parse_if_rest(&mut self, keyword: Span) -> Result<Node, ()> {
        let cond = self.parse_expression_statement()?;
        self.expect_then()?;
        let then_statements =
            self.parse_statements(&[TokenKind::Elsif, TokenKind::Else, TokenKind::End])?;
        let then_branch = self.body(then_statements);

        let (else_branch, end) = if self.check(TokenKind::Elsif) {
            let elsif = self.advance().span;
            let nested = self.parse_if_rest(elsif)?;
            let end = nested.span;
            (Some(Box::new(nested)), end)
        } else if self.match_token(TokenKind::Else) {
            let statements = self.parse_statements(&[TokenKind::End])?;
            let end = self.consume(TokenKind::End, "Expected 'end' to close 'if'")?.span;
            (self.body(statements), end)
        } else {
            let end = self.consume(TokenKind::End, "Expected 'end' to close 'if'")?.span;
            (None, end)
        };

        Ok(self.node(
            NodeKind::If {
                cond: Box::new(cond),
                then_branch,
                else_branch,
            },
            keyword.merge(end),
        ))
    }

    /// `unless` is an `if` with its branches swapped
    pub(super) fn parse_unless(&mut self) -> Result<Node, ()> {
        let keyword = self.advance().span;
        let cond = self.parse_expression_statement()?;
        self.expect_then()?;
        let statements = self.parse_statements(&[TokenKind::Else, TokenKind::End])?;
        let unless_branch = self.body(statements);
        let else_branch = if self.match_token(TokenKind::Else) {
            let statements = self.parse_statements(&[TokenKind::End])?;
            self.body(statements)
        } else {
            None
        };
        let end = self
            .consume(TokenKind::End, "Expected 'end' to close 'unless'")?
            .span;

        Ok(self.node(
            NodeKind::If {
                cond: Box::new(cond),
                then_branch: else_branch,
                else_branch: unless_branch,
            },
            keyword.merge(end),
        ))
    }

    fn expect_then(&mut self) -> Result<(), ()> {
        if self.match_token(TokenKind::Then) {
            return Ok(());
        }
        if self.check(TokenKind::Newline) || self.check(TokenKind::Semicolon) {
            return Ok(());
        }
        self.error("Expected 'then' or newline after condition");
        Err(())
    }

    // === Loops ===

    /// `while cond [do] ... end` and `until cond [do] ... end`
    pub(super) fn parse_while(&mut self) -> Result<Node, ()> {
        let keyword = self.advance().clone();
        let cond = self.with_do_allowed(false, |p| p.parse_expression_statement())?;
        let do_keyword = self.loop_header_end()?;
        let statements = self.with_do_allowed(true, |p| p.parse_statements(&[TokenKind::End]))?;
        let end = self
            .consume(TokenKind::End, "Expected 'end' to close loop")?
            .span;
        let body = self.body(statements);

        let cond = Box::new(cond);
        let kind = if keyword.kind == TokenKind::While {
            NodeKind::While {
                cond,
                body,
                do_keyword,
            }
        } else {
            NodeKind::Until {
                cond,
                body,
                do_keyword,
            }
        };
        Ok(self.node(kind, keyword.span.merge(end)))
    }

    /// `for var in iterable [do] ... end`
    pub(super) fn parse_for(&mut self) -> Result<Node, ()> {
        let keyword = self.advance().span;
        let var = self.consume(TokenKind::Identifier, "Expected loop variable after 'for'")?;
        self.declare_local(&var.lexeme);
        self.consume(TokenKind::In, "Expected 'in' after loop variable")?;
        let iter = self.with_do_allowed(false, |p| p.parse_expression_statement())?;
        let do_keyword = self.loop_header_end()?;
        let statements = self.with_do_allowed(true, |p| p.parse_statements(&[TokenKind::End]))?;
        let end = self
            .consume(TokenKind::End, "Expected 'end' to close loop")?
            .span;
        let body = self.body(statements);

        Ok(self.node(
            NodeKind::For {
                var: var.lexeme,
                var_span: var.span,
                iter: Box::new(iter),
                body,
                do_keyword,
            },
            keyword.merge(end),
        ))
    }

    /// Optional `do` after a loop header, otherwise a statement separator
    fn loop_header_end(&mut self) -> Result<Option<Span>, ()> {
        if self.check(TokenKind::Do) {
            return Ok(Some(self.advance().span));
        }
        if self.check(TokenKind::Newline) || self.check(TokenKind::Semicolon) {
            return Ok(None);
        }
        self.error("Expected 'do' or newline after loop header");
        Err(())
    }

    /// `begin ... end`
    pub(super) fn parse_begin(&mut self) -> Result<Node, ()> {
        let keyword = self.advance().span;
        let body = self.parse_statements(&[TokenKind::End])?;
        let end = self
            .consume(TokenKind::End, "Expected 'end' to close 'begin'")?
            .span;
        Ok(self.node(NodeKind::KwBegin { body, keyword }, keyword.merge(end)))
    }

    // === Definitions ===

    /// `def name(params) ... end` and `def self.name ... end`
    pub(super) fn parse_def(&mut self) -> Result<Node, ()> {
        let keyword = self.advance().span;

        let singleton = if self.check(TokenKind::SelfKw) && self.peek_next().kind == TokenKind::Dot
        {
            let span = self.advance().span;
            self.advance(); // .
            Some(Box::new(self.node(NodeKind::SelfRef, span)))
        } else {
            None
        };

        let name = self.parse_def_name()?;

        self.push_scope(true);
        let result = self.parse_def_rest();
        self.pop_scope();
        let (params, defaults, body, end) = result?;

        Ok(self.node(
            NodeKind::Def {
                singleton,
                name,
                params,
                defaults,
                body,
            },
            keyword.merge(end),
        ))
    }

    fn parse_def_name(&mut self) -> Result<String, ()> {
        let token = self.peek().clone();
        let name = match token.kind {
            TokenKind::Identifier | TokenKind::Constant => {
                self.advance();
                // Setter: `def value=(v)`
                if self.check(TokenKind::Equal) && !self.peek().spaced {
                    self.advance();
                    format!("{}=", token.lexeme)
                } else {
                    token.lexeme
                }
            }
            TokenKind::LeftBracket => {
                self.advance();
                self.consume(TokenKind::RightBracket, "Expected ']' in method name")?;
                if self.check(TokenKind::Equal) && !self.peek().spaced {
                    self.advance();
                    "[]=".to_string()
                } else {
                    "[]".to_string()
                }
            }
            kind => match kind.operator_method() {
                Some(op) => {
                    self.advance();
                    op.to_string()
                }
                None => {
                    self.error("Expected method name after 'def'");
                    return Err(());
                }
            },
        };
        Ok(name)
    }

    /// Parameters, default value expressions, body and closing `end`
    #[allow(clippy::type_complexity)]
    fn parse_def_rest(&mut self) -> Result<(Vec<String>, Vec<Node>, Option<Box<Node>>, Span), ()> {
        let mut params = Vec::new();
        let mut defaults = Vec::new();
        if self.check(TokenKind::LeftParen) {
            self.advance();
            self.skip_newlines();
            while !self.check(TokenKind::RightParen) {
                let (name, default) = self.parse_param()?;
                params.push(name);
                defaults.extend(default);
                self.skip_newlines();
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
                self.skip_newlines();
            }
            self.consume(TokenKind::RightParen, "Expected ')' after parameters")?;
        } else {
            while !self.peek().kind.is_terminator() {
                let (name, default) = self.parse_param()?;
                params.push(name);
                defaults.extend(default);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }

        if self.check(TokenKind::Equal) {
            self.error_at(
                error_codes::UNSUPPORTED_SYNTAX,
                "Endless method definitions are not supported",
                self.peek().span,
            );
            return Err(());
        }

        let statements = self.parse_statements(&[TokenKind::End])?;
        let end = self
            .consume(TokenKind::End, "Expected 'end' to close method definition")?
            .span;
        let body = self.body(statements);
        Ok((params, defaults, body, end))
    }

    /// One method parameter and its default value (`b = 1`, `key: 2`).
    /// The name is in scope after its own default.
    fn parse_param(&mut self) -> Result<(String, Option<Node>), ()> {
        let token = self.peek().clone();
        let (name, default) = match token.kind {
            TokenKind::Star | TokenKind::StarStar | TokenKind::Amp => {
                self.advance();
                let name = self
                    .consume(TokenKind::Identifier, "Expected parameter name")?
                    .lexeme;
                (name, None)
            }
            TokenKind::Identifier => {
                self.advance();
                let default = if self.match_token(TokenKind::Equal) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                (token.lexeme, default)
            }
            TokenKind::Label => {
                self.advance();
                let kind = self.peek().kind;
                let default = if matches!(kind, TokenKind::Comma | TokenKind::RightParen)
                    || kind.is_terminator()
                {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                (token.lexeme, default)
            }
            _ => {
                self.error("Expected parameter name");
                return Err(());
            }
        };

        self.declare_local(&name);
        Ok((name, default))
    }

    /// `class Name [< Super] ... end`
    pub(super) fn parse_class(&mut self) -> Result<Node, ()> {
        let keyword = self.advance().span;
        if self.check(TokenKind::LessLess) {
            self.error_at(
                error_codes::UNSUPPORTED_SYNTAX,
                "Singleton class bodies are not supported",
                self.peek().span,
            );
            return Err(());
        }
        let name = self.parse_const_path()?;
        let superclass = if self.match_token(TokenKind::Less) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };

        self.push_scope(true);
        let result = self.parse_statements(&[TokenKind::End]);
        self.pop_scope();
        let statements = result?;
        let end = self
            .consume(TokenKind::End, "Expected 'end' to close class definition")?
            .span;
        let body = self.body(statements);

        Ok(self.node(
            NodeKind::Class {
                name: Box::new(name),
                superclass,
                body,
            },
            keyword.merge(end),
        ))
    }

    /// `module Name ... end`
    pub(super) fn parse_module(&mut self) -> Result<Node, ()> {
        let keyword = self.advance().span;
        let name = self.parse_const_path()?;

        self.push_scope(true);
        let result = self.parse_statements(&[TokenKind::End]);
        self.pop_scope();
        let statements = result?;
        let end = self
            .consume(TokenKind::End, "Expected 'end' to close module definition")?
            .span;
        let body = self.body(statements);

        Ok(self.node(
            NodeKind::Module {
                name: Box::new(name),
                body,
            },
            keyword.merge(end),
        ))
    }

    /// `Foo`, `Foo::Bar` or `::Foo` in a class or module header
    fn parse_const_path(&mut self) -> Result<Node, ()> {
        let top_level = self.match_token(TokenKind::ColonColon);
        let start = self.previous().span;
        let first = self.consume(TokenKind::Constant, "Expected constant name")?;
        let span = if top_level {
            start.merge(first.span)
        } else {
            first.span
        };
        let mut node = self.node(
            NodeKind::Const {
                scope: None,
                name: first.lexeme,
                top_level,
            },
            span,
        );
        while self.match_token(TokenKind::ColonColon) {
            let name = self.consume(TokenKind::Constant, "Expected constant name after '::'")?;
            let span = node.span.merge(name.span);
            node = self.node(
                NodeKind::Const {
                    scope: Some(Box::new(node)),
                    name: name.lexeme,
                    top_level: false,
                },
                span,
            );
        }
        Ok(node)
    }

    // === Jumps ===

    /// `return`, `break` and `next` with an optional value
    pub(super) fn parse_jump(&mut self) -> Result<Node, ()> {
        let keyword = self.advance().clone();
        let value = if self.starts_expression() {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        let span = value
            .as_ref()
            .map(|v| keyword.span.merge(v.span))
            .unwrap_or(keyword.span);
        let kind = match keyword.kind {
            TokenKind::Return => NodeKind::Return(value),
            TokenKind::Break => NodeKind::Break(value),
            _ => NodeKind::Next(value),
        };
        Ok(self.node(kind, span))
    }

    /// `yield`, `yield(a, b)` or `yield a, b`
    pub(super) fn parse_yield(&mut self) -> Result<Node, ()> {
        let keyword = self.advance().span;
        let mut end = keyword;
        let args = if self.check(TokenKind::LeftParen) && !self.peek().spaced {
            self.advance();
            let args = self.parse_call_args(Some(TokenKind::RightParen))?;
            end = self
                .consume(TokenKind::RightParen, "Expected ')' after arguments")?
                .span;
            args
        } else if self.starts_expression() {
            let args = self.with_do_allowed(false, |p| p.parse_call_args(None))?;
            if let Some(last) = args.last() {
                end = last.span;
            }
            args
        } else {
            Vec::new()
        };
        Ok(self.node(NodeKind::Yield(args), keyword.merge(end)))
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::NodeKind;
    use crate::parser::{RubyParser, ScriptParser};
    use crate::span::Span;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn kinds(source: &str) -> Vec<&'static str> {
        RubyParser
            .parse(source)
            .unwrap()
            .statements
            .iter()
            .map(|s| s.kind_name())
            .collect()
    }

    #[rstest]
    #[case("class Foo < Bar\n  X = 1\nend", "class")]
    #[case("module Tools; end", "module")]
    #[case("def self.run(a, *rest, &blk)\n  a\nend", "def")]
    #[case("for i in 1..3 do\n  i\nend", "for")]
    #[case("while x < 3\n  x += 1\nend", "while")]
    #[case("until done?\nend", "until")]
    #[case("begin\n  work\nend", "kwbegin")]
    #[case("if a then b elsif c then d else e end", "if")]
    #[case("unless a\n  b\nend", "if")]
    #[case("foo if bar", "if")]
    #[case("foo while bar", "while")]
    #[case("a and b", "and")]
    #[case("not a", "send")]
    fn test_statement_kinds(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(kinds(source), vec![expected]);
    }

    #[test]
    fn test_statements_split_on_newlines_and_semicolons() {
        assert_eq!(kinds("a = 1; b = 2\nc = 3"), vec!["lvasgn", "lvasgn", "lvasgn"]);
    }

    #[test]
    fn test_unless_swaps_branches() {
        let program = RubyParser.parse("unless a\n  1\nelse\n  2\nend").unwrap();
        match &program.statements[0].kind {
            NodeKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                assert_eq!(then_branch.as_ref().unwrap().kind, NodeKind::Int(2));
                assert_eq!(else_branch.as_ref().unwrap().kind, NodeKind::Int(1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_for_loop_spans() {
        let source = "for x in list do\n  x\nend";
        let program = RubyParser.parse(source).unwrap();
        match &program.statements[0].kind {
            NodeKind::For {
                var,
                var_span,
                do_keyword,
                ..
            } => {
                assert_eq!(var, "x");
                assert_eq!(var_span.text(source), "x");
                assert_eq!(*do_keyword, Some(Span::new(14, 16)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_modifier_while_body_precedes_condition() {
        let program = RubyParser.parse("tick while running").unwrap();
        match &program.statements[0].kind {
            NodeKind::While { cond, body, .. } => {
                assert!(body.as_ref().unwrap().span.start < cond.span.start);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_return_without_value() {
        let program = RubyParser.parse("def a\n  return\nend").unwrap();
        match &program.statements[0].kind {
            NodeKind::Def { body, .. } => {
                assert_eq!(body.as_ref().unwrap().kind, NodeKind::Return(None));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_default_parameter_values() {
        let program = RubyParser.parse("def f(a, b = a, key: 2)\n  b\nend").unwrap();
        match &program.statements[0].kind {
            NodeKind::Def {
                params, defaults, ..
            } => {
                assert_eq!(params, &vec!["a".to_string(), "b".to_string(), "key".to_string()]);
                let kinds: Vec<_> = defaults.iter().map(|d| d.kind_name()).collect();
                assert_eq!(kinds, vec!["lvar", "int"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_yield_arguments() {
        let program = RubyParser.parse("def each\n  yield 1, 2\nend").unwrap();
        match &program.statements[0].kind {
            NodeKind::Def { body, .. } => match &body.as_ref().unwrap().kind {
                NodeKind::Yield(args) => assert_eq!(args.len(), 2),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[rstest]
    #[case("case x\nwhen 1 then 2\nend")]
    #[case("begin\n  a\nrescue\n  b\nend")]
    #[case("class << self\nend")]
    #[case("foo(*args)")]
    fn test_unsupported_syntax_is_rejected(#[case] source: &str) {
        assert!(RubyParser.parse(source).is_err());
    }

    #[test]
    fn test_missing_end_is_error() {
        assert!(RubyParser.parse("while true\n  x").is_err());
    }
}
