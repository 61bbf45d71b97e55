//! Expression parsing (Pratt parser)

use super::{Parser, Precedence};
use crate::ast::{Node, NodeKind};
use crate::diagnostic::error_codes;
use crate::span::Span;
use crate::token::{Token, TokenKind};

/// Identifier shaped like a local variable name (no `?`/`!` suffix, not
/// capitalized)
fn is_local_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

impl Parser {
    /// Parse an expression
    pub(super) fn parse_expression(&mut self) -> Result<Node, ()> {
        self.parse_precedence(Precedence::Lowest)
    }

    /// Parse expression with given precedence (Pratt parsing)
    pub(super) fn parse_precedence(&mut self, precedence: Precedence) -> Result<Node, ()> {
        let mut left = self.parse_prefix()?;

        loop {
            self.skip_newlines_before_chain();
            let token = self.peek().clone();
            let infix = match Self::infix_precedence(token.kind) {
                Some(infix) => infix,
                None => break,
            };
            if infix <= precedence {
                break;
            }
            left = self.parse_infix(left, token, infix)?;
        }

        Ok(left)
    }

    fn infix_precedence(kind: TokenKind) -> Option<Precedence> {
        let precedence = match kind {
            TokenKind::Equal | TokenKind::OpAssign => Precedence::Assignment,
            TokenKind::Question => Precedence::Ternary,
            TokenKind::DotDot | TokenKind::DotDotDot => Precedence::Range,
            TokenKind::PipePipe => Precedence::OrOr,
            TokenKind::AmpAmp => Precedence::AndAnd,
            TokenKind::Spaceship
            | TokenKind::EqualEqual
            | TokenKind::EqualEqualEqual
            | TokenKind::BangEqual
            | TokenKind::Match
            | TokenKind::NotMatch => Precedence::Equality,
            TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => Precedence::Comparison,
            TokenKind::Pipe | TokenKind::Caret => Precedence::BitOr,
            TokenKind::Amp => Precedence::BitAnd,
            TokenKind::LessLess | TokenKind::GreaterGreater => Precedence::Shift,
            TokenKind::Plus | TokenKind::Minus => Precedence::Term,
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Factor,
            TokenKind::StarStar => Precedence::Power,
            TokenKind::Dot
            | TokenKind::SafeNav
            | TokenKind::ColonColon
            | TokenKind::LeftBracket => Precedence::Call,
            _ => return None,
        };
        Some(precedence)
    }

    /// `foo\n  .bar` continues the expression on the next line
    fn skip_newlines_before_chain(&mut self) {
        if !self.check(TokenKind::Newline) {
            return;
        }
        let mut index = self.current;
        while self.tokens[index].kind == TokenKind::Newline {
            index += 1;
        }
        if matches!(
            self.tokens[index].kind,
            TokenKind::Dot | TokenKind::SafeNav
        ) {
            self.current = index;
        }
    }

    // === Prefix ===

    fn parse_prefix(&mut self) -> Result<Node, ()> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Bang => self.parse_unary(token, "!", Precedence::Unary),
            TokenKind::Tilde => self.parse_unary(token, "~", Precedence::Unary),
            TokenKind::Plus => self.parse_unary(token, "+@", Precedence::Unary),
            TokenKind::Minus => {
                let next = self.peek_next().clone();
                let numeric = matches!(next.kind, TokenKind::Integer | TokenKind::Float);
                let before_power = self
                    .tokens
                    .get(self.current + 2)
                    .is_some_and(|t| t.kind == TokenKind::StarStar);
                if numeric && !next.spaced && !before_power {
                    self.advance();
                    self.parse_number(Some(token.span))
                } else {
                    self.parse_unary(token, "-@", Precedence::UnaryMinus)
                }
            }
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_expression()?;
                Ok(self.unary_send(token, "!", operand))
            }
            TokenKind::DotDot | TokenKind::DotDotDot => {
                self.advance();
                let to = self.parse_precedence(Precedence::Range)?;
                let span = token.span.merge(to.span);
                Ok(self.node(
                    NodeKind::Range {
                        from: None,
                        to: Some(Box::new(to)),
                        exclusive: token.kind == TokenKind::DotDotDot,
                    },
                    span,
                ))
            }
            TokenKind::Amp => {
                self.error("Block argument is only allowed in an argument list");
                Err(())
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_unary(
        &mut self,
        operator: Token,
        method: &str,
        precedence: Precedence,
    ) -> Result<Node, ()> {
        self.advance();
        let operand = self.parse_precedence(precedence)?;
        Ok(self.unary_send(operator, method, operand))
    }

    fn unary_send(&mut self, operator: Token, method: &str, operand: Node) -> Node {
        let span = operator.span.merge(operand.span);
        self.node(
            NodeKind::Send {
                receiver: Some(Box::new(operand)),
                method: method.to_string(),
                args: Vec::new(),
                safe_nav: false,
                selector: operator.span,
            },
            span,
        )
    }

    // === Primary ===

    fn parse_primary(&mut self) -> Result<Node, ()> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Integer | TokenKind::Float => self.parse_number(None),
            TokenKind::String => {
                self.advance();
                Ok(self.node(NodeKind::Str(token.lexeme), token.span))
            }
            TokenKind::Symbol => {
                self.advance();
                Ok(self.node(NodeKind::Sym(token.lexeme), token.span))
            }
            TokenKind::Nil => self.keyword_literal(NodeKind::Nil),
            TokenKind::True => self.keyword_literal(NodeKind::True),
            TokenKind::False => self.keyword_literal(NodeKind::False),
            TokenKind::SelfKw => self.keyword_literal(NodeKind::SelfRef),
            TokenKind::Ivar => {
                self.advance();
                Ok(self.node(NodeKind::Ivar(token.lexeme), token.span))
            }
            TokenKind::Cvar => {
                self.advance();
                Ok(self.node(NodeKind::Cvar(token.lexeme), token.span))
            }
            TokenKind::Gvar => {
                self.advance();
                Ok(self.node(NodeKind::Gvar(token.lexeme), token.span))
            }
            TokenKind::Constant => self.parse_constant(),
            TokenKind::ColonColon => {
                self.advance();
                let name = self.consume(TokenKind::Constant, "Expected constant after '::'")?;
                let span = token.span.merge(name.span);
                Ok(self.node(
                    NodeKind::Const {
                        scope: None,
                        name: name.lexeme,
                        top_level: true,
                    },
                    span,
                ))
            }
            TokenKind::Identifier => self.parse_identifier(),
            TokenKind::LeftParen => self.parse_parenthesized(),
            TokenKind::LeftBracket => self.parse_array(),
            TokenKind::LeftBrace => self.parse_hash(),

            TokenKind::If => self.parse_if(),
            TokenKind::Unless => self.parse_unless(),
            TokenKind::While | TokenKind::Until => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Begin => self.parse_begin(),
            TokenKind::Def => self.parse_def(),
            TokenKind::Class => self.parse_class(),
            TokenKind::Module => self.parse_module(),
            TokenKind::Return | TokenKind::Break | TokenKind::Next => self.parse_jump(),
            TokenKind::Yield => self.parse_yield(),
            TokenKind::Redo => self.keyword_literal(NodeKind::Redo),
            TokenKind::Retry => self.keyword_literal(NodeKind::Retry),

            TokenKind::Label => {
                self.error(&format!("Unexpected label '{}:'", token.lexeme));
                Err(())
            }
            TokenKind::Eof => {
                self.error("Unexpected end of input");
                Err(())
            }
            _ => {
                self.error(&format!("Expected expression, found '{}'", token.lexeme));
                Err(())
            }
        }
    }

    fn keyword_literal(&mut self, kind: NodeKind) -> Result<Node, ()> {
        let span = self.advance().span;
        Ok(self.node(kind, span))
    }

    /// Number literal at the current token; `minus` is the span of an
    /// adjacent leading `-` already consumed
    fn parse_number(&mut self, minus: Option<Span>) -> Result<Node, ()> {
        let token = self.advance().clone();
        let span = minus.map(|m| m.merge(token.span)).unwrap_or(token.span);
        let text = match minus {
            Some(_) => format!("-{}", token.lexeme),
            None => token.lexeme.clone(),
        };
        let kind = if token.kind == TokenKind::Float {
            text.parse::<f64>().ok().map(NodeKind::Float)
        } else {
            text.parse::<i64>().ok().map(NodeKind::Int)
        };
        match kind {
            Some(kind) => Ok(self.node(kind, span)),
            None => {
                self.error_at(
                    error_codes::UNEXPECTED_TOKEN,
                    &format!("Invalid number literal '{}'", text),
                    span,
                );
                Err(())
            }
        }
    }

    fn parse_constant(&mut self) -> Result<Node, ()> {
        let token = self.advance().clone();
        if self.check(TokenKind::LeftParen) && !self.peek().spaced {
            return self.parse_call_rest(None, token.lexeme, token.span, false);
        }
        Ok(self.node(
            NodeKind::Const {
                scope: None,
                name: token.lexeme,
                top_level: false,
            },
            token.span,
        ))
    }

    /// Bare identifier: a local read when the name is a known local, a
    /// receiverless call otherwise
    fn parse_identifier(&mut self) -> Result<Node, ()> {
        let token = self.advance().clone();
        let paren_call = self.check(TokenKind::LeftParen) && !self.peek().spaced;
        if self.is_local(&token.lexeme) && !paren_call {
            return Ok(self.node(NodeKind::Lvar(token.lexeme), token.span));
        }
        self.parse_call_rest(None, token.lexeme, token.span, false)
    }

    fn parse_parenthesized(&mut self) -> Result<Node, ()> {
        let open = self.advance().span;
        let statements =
            self.with_do_allowed(true, |p| p.parse_statements(&[TokenKind::RightParen]))?;
        let close = self.consume(TokenKind::RightParen, "Expected ')'")?.span;
        Ok(self.node(NodeKind::Begin(statements), open.merge(close)))
    }

    fn parse_array(&mut self) -> Result<Node, ()> {
        let open = self.advance().span;
        let elements = self.with_do_allowed(true, |p| {
            let mut elements = Vec::new();
            p.skip_newlines();
            while !p.check(TokenKind::RightBracket) {
                if p.check(TokenKind::Star) {
                    p.error("Splat is not supported");
                    return Err(());
                }
                elements.push(p.parse_expression()?);
                p.skip_newlines();
                if !p.match_token(TokenKind::Comma) {
                    break;
                }
                p.skip_newlines();
            }
            Ok(elements)
        })?;
        let close = self
            .consume(TokenKind::RightBracket, "Expected ']' after array elements")?
            .span;
        Ok(self.node(NodeKind::Array(elements), open.merge(close)))
    }

    fn parse_hash(&mut self) -> Result<Node, ()> {
        let open = self.advance().span;
        let pairs = self.with_do_allowed(true, |p| {
            let mut pairs = Vec::new();
            p.skip_newlines();
            while !p.check(TokenKind::RightBrace) {
                pairs.push(p.parse_pair(None)?);
                p.skip_newlines();
                if !p.match_token(TokenKind::Comma) {
                    break;
                }
                p.skip_newlines();
            }
            Ok(pairs)
        })?;
        let close = self
            .consume(TokenKind::RightBrace, "Expected '}' after hash entries")?
            .span;
        Ok(self.node(NodeKind::Hash(pairs), open.merge(close)))
    }

    /// `key => value` or `label: value`; `key` is an already parsed key
    fn parse_pair(&mut self, key: Option<Node>) -> Result<Node, ()> {
        let key = match key {
            Some(key) => {
                self.consume(TokenKind::FatArrow, "Expected '=>' after hash key")?;
                key
            }
            None if self.check(TokenKind::Label) => {
                let label = self.advance().clone();
                self.node(NodeKind::Sym(label.lexeme), label.span)
            }
            None => {
                let key = self.parse_expression()?;
                self.consume(TokenKind::FatArrow, "Expected '=>' after hash key")?;
                key
            }
        };
        self.skip_newlines();
        let value = self.parse_expression()?;
        let span = key.span.merge(value.span);
        Ok(self.node(
            NodeKind::Pair {
                key: Box::new(key),
                value: Box::new(value),
            },
            span,
        ))
    }

    /// Braceless hash as the trailing call argument: `foo a, key: 1, 'b' => 2`
    fn parse_bare_hash(&mut self, first_key: Option<Node>) -> Result<Node, ()> {
        let mut pairs = vec![self.parse_pair(first_key)?];
        while self.check(TokenKind::Comma) && self.peek_next().kind != TokenKind::Amp {
            self.advance();
            self.skip_newlines();
            pairs.push(self.parse_pair(None)?);
        }
        let span = pairs[0].span.merge(pairs[pairs.len() - 1].span);
        Ok(self.node(NodeKind::Hash(pairs), span))
    }

    // === Infix ===

    fn parse_infix(&mut self, left: Node, token: Token, precedence: Precedence) -> Result<Node, ()> {
        match token.kind {
            TokenKind::Equal => self.parse_assignment(left),
            TokenKind::OpAssign => self.parse_op_assignment(left),
            TokenKind::Question => self.parse_ternary(left),
            TokenKind::DotDot | TokenKind::DotDotDot => {
                self.advance();
                let to = if self.starts_expression() {
                    Some(Box::new(self.parse_precedence(Precedence::Range)?))
                } else {
                    None
                };
                let end = to.as_ref().map(|t| t.span).unwrap_or(token.span);
                let span = left.span.merge(end);
                Ok(self.node(
                    NodeKind::Range {
                        from: Some(Box::new(left)),
                        to,
                        exclusive: token.kind == TokenKind::DotDotDot,
                    },
                    span,
                ))
            }
            TokenKind::AmpAmp | TokenKind::PipePipe => {
                self.advance();
                self.skip_newlines();
                let right = self.parse_precedence(precedence)?;
                let span = left.span.merge(right.span);
                let (left, right) = (Box::new(left), Box::new(right));
                let kind = if token.kind == TokenKind::AmpAmp {
                    NodeKind::And { left, right }
                } else {
                    NodeKind::Or { left, right }
                };
                Ok(self.node(kind, span))
            }
            TokenKind::Dot | TokenKind::SafeNav => self.parse_method_call(left, token),
            TokenKind::ColonColon => self.parse_scoped(left),
            TokenKind::LeftBracket => self.parse_index(left),
            _ => self.parse_binary(left, token, precedence),
        }
    }

    fn parse_binary(&mut self, left: Node, operator: Token, precedence: Precedence) -> Result<Node, ()> {
        self.advance();
        self.skip_newlines();
        // ** is right-associative
        let right = if precedence == Precedence::Power {
            self.parse_precedence(precedence.lower())?
        } else {
            self.parse_precedence(precedence)?
        };
        let method = operator
            .kind
            .operator_method()
            .unwrap_or(operator.lexeme.as_str())
            .to_string();
        let span = left.span.merge(right.span);
        Ok(self.node(
            NodeKind::Send {
                receiver: Some(Box::new(left)),
                method,
                args: vec![right],
                safe_nav: false,
                selector: operator.span,
            },
            span,
        ))
    }

    fn parse_ternary(&mut self, cond: Node) -> Result<Node, ()> {
        self.advance(); // ?
        self.skip_newlines();
        let then_branch = self.parse_precedence(Precedence::Ternary)?;
        self.skip_newlines();
        self.consume(TokenKind::Colon, "Expected ':' in conditional expression")?;
        self.skip_newlines();
        let else_branch = self.parse_precedence(Precedence::Assignment)?;
        let span = cond.span.merge(else_branch.span);
        Ok(self.node(
            NodeKind::If {
                cond: Box::new(cond),
                then_branch: Some(Box::new(then_branch)),
                else_branch: Some(Box::new(else_branch)),
            },
            span,
        ))
    }

    fn parse_assignment(&mut self, target: Node) -> Result<Node, ()> {
        let equal = self.advance().clone();
        self.skip_newlines();

        if let NodeKind::Send {
            receiver: None,
            method,
            args,
            ..
        } = &target.kind
        {
            if args.is_empty() && is_local_name(method) {
                let name = method.clone();
                self.declare_local(&name);
            }
        }

        let value = self.parse_precedence(Precedence::Assignment.lower())?;
        let span = target.span.merge(value.span);
        let boxed = Box::new(value);

        let kind = match target.kind {
            NodeKind::Lvar(name) => NodeKind::Lvasgn { name, value: boxed },
            NodeKind::Send {
                receiver: None,
                method,
                args,
                ..
            } if args.is_empty() && is_local_name(&method) => NodeKind::Lvasgn {
                name: method,
                value: boxed,
            },
            NodeKind::Ivar(name) => NodeKind::Ivasgn { name, value: boxed },
            NodeKind::Cvar(name) => NodeKind::Cvasgn { name, value: boxed },
            NodeKind::Gvar(name) => NodeKind::Gvasgn { name, value: boxed },
            NodeKind::Const { scope, name, .. } => NodeKind::Casgn {
                scope,
                name,
                value: boxed,
            },
            NodeKind::Send {
                receiver: Some(receiver),
                method,
                mut args,
                safe_nav,
                selector,
            } if method == "[]" => {
                args.push(*boxed);
                NodeKind::Send {
                    receiver: Some(receiver),
                    method: "[]=".to_string(),
                    args,
                    safe_nav,
                    selector,
                }
            }
            NodeKind::Send {
                receiver: Some(receiver),
                method,
                args,
                safe_nav,
                selector,
            } if args.is_empty() && is_local_name(&method) => NodeKind::Send {
                receiver: Some(receiver),
                method: format!("{}=", method),
                args: vec![*boxed],
                safe_nav,
                selector,
            },
            _ => {
                self.error_at(
                    error_codes::UNEXPECTED_TOKEN,
                    "Invalid assignment target",
                    equal.span,
                );
                return Err(());
            }
        };

        Ok(self.node(kind, span))
    }

    fn parse_op_assignment(&mut self, target: Node) -> Result<Node, ()> {
        let operator = self.advance().clone();
        self.skip_newlines();

        let target = match target.kind {
            NodeKind::Send {
                receiver: None,
                ref method,
                ref args,
                ..
            } if args.is_empty() && is_local_name(method) => {
                let name = method.clone();
                self.declare_local(&name);
                Node {
                    id: target.id,
                    kind: NodeKind::Lvar(name),
                    span: target.span,
                }
            }
            NodeKind::Lvar(_)
            | NodeKind::Ivar(_)
            | NodeKind::Cvar(_)
            | NodeKind::Gvar(_)
            | NodeKind::Const { .. }
            | NodeKind::Send {
                receiver: Some(_), ..
            } => target,
            _ => {
                self.error_at(
                    error_codes::UNEXPECTED_TOKEN,
                    "Invalid assignment target",
                    operator.span,
                );
                return Err(());
            }
        };

        let value = self.parse_precedence(Precedence::Assignment.lower())?;
        let span = target.span.merge(value.span);
        Ok(self.node(
            NodeKind::OpAsgn {
                target: Box::new(target),
                op: operator.lexeme,
                value: Box::new(value),
            },
            span,
        ))
    }

    // === Calls ===

    fn parse_method_call(&mut self, receiver: Node, dot: Token) -> Result<Node, ()> {
        self.advance(); // . or &.
        self.skip_newlines();
        let name = self.peek().clone();
        let method = match name.kind {
            TokenKind::Identifier | TokenKind::Constant => name.lexeme.clone(),
            kind => match kind.operator_method() {
                Some(op) => op.to_string(),
                None => {
                    self.error("Expected method name after '.'");
                    return Err(());
                }
            },
        };
        self.advance();
        self.parse_call_rest(
            Some(receiver),
            method,
            name.span,
            dot.kind == TokenKind::SafeNav,
        )
    }

    fn parse_scoped(&mut self, scope: Node) -> Result<Node, ()> {
        self.advance(); // ::
        let name = self.peek().clone();
        match name.kind {
            TokenKind::Constant
                if !(self.peek_next().kind == TokenKind::LeftParen && !self.peek_next().spaced) =>
            {
                self.advance();
                let span = scope.span.merge(name.span);
                Ok(self.node(
                    NodeKind::Const {
                        scope: Some(Box::new(scope)),
                        name: name.lexeme,
                        top_level: false,
                    },
                    span,
                ))
            }
            TokenKind::Constant | TokenKind::Identifier => {
                self.advance();
                self.parse_call_rest(Some(scope), name.lexeme, name.span, false)
            }
            _ => {
                self.error("Expected constant or method name after '::'");
                Err(())
            }
        }
    }

    fn parse_index(&mut self, receiver: Node) -> Result<Node, ()> {
        let open = self.advance().span;
        let args =
            self.with_do_allowed(true, |p| p.parse_call_args(Some(TokenKind::RightBracket)))?;
        let close = self
            .consume(TokenKind::RightBracket, "Expected ']' after index")?
            .span;
        let span = receiver.span.merge(close);
        Ok(self.node(
            NodeKind::Send {
                receiver: Some(Box::new(receiver)),
                method: "[]".to_string(),
                args,
                safe_nav: false,
                selector: open.merge(close),
            },
            span,
        ))
    }

    /// Arguments and block of a call whose name was just consumed
    pub(super) fn parse_call_rest(
        &mut self,
        receiver: Option<Node>,
        method: String,
        selector: Span,
        safe_nav: bool,
    ) -> Result<Node, ()> {
        let start = receiver.as_ref().map(|r| r.span).unwrap_or(selector);
        let mut end = selector;
        let mut args = Vec::new();

        if self.check(TokenKind::LeftParen) && !self.peek().spaced {
            self.advance();
            args = self.with_do_allowed(true, |p| p.parse_call_args(Some(TokenKind::RightParen)))?;
            end = self
                .consume(TokenKind::RightParen, "Expected ')' after arguments")?
                .span;
        } else if self.can_start_command_arg() {
            args = self.with_do_allowed(false, |p| p.parse_call_args(None))?;
            if let Some(last) = args.last() {
                end = last.span;
            }
        }

        let call = self.node(
            NodeKind::Send {
                receiver: receiver.map(Box::new),
                method,
                args,
                safe_nav,
                selector,
            },
            start.merge(end),
        );
        self.parse_block_if_present(call)
    }

    /// Comma separated call arguments. With a closing token, newlines are
    /// allowed between arguments; without one (command call), the list ends
    /// at the first token that is not a comma.
    pub(super) fn parse_call_args(&mut self, closing: Option<TokenKind>) -> Result<Vec<Node>, ()> {
        let mut args = Vec::new();
        if closing.is_some() {
            self.skip_newlines();
        }
        if closing.is_some_and(|c| self.check(c)) {
            return Ok(args);
        }

        loop {
            if self.check(TokenKind::Amp) {
                let amp = self.advance().span;
                let inner = self.parse_precedence(Precedence::Unary)?;
                let span = amp.merge(inner.span);
                args.push(self.node(NodeKind::BlockPass(Box::new(inner)), span));
            } else if self.check(TokenKind::Label) {
                args.push(self.parse_bare_hash(None)?);
            } else if self.check(TokenKind::Star) || self.check(TokenKind::StarStar) {
                self.error_at(
                    error_codes::UNSUPPORTED_SYNTAX,
                    "Splat arguments are not supported",
                    self.peek().span,
                );
                return Err(());
            } else {
                let arg = self.parse_expression()?;
                if self.check(TokenKind::FatArrow) {
                    args.push(self.parse_bare_hash(Some(arg))?);
                } else {
                    args.push(arg);
                }
            }

            if closing.is_some() {
                self.skip_newlines();
            }
            if !self.match_token(TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }

        Ok(args)
    }

    /// A spaced token that begins an argument of a parenthesis-free call
    fn can_start_command_arg(&self) -> bool {
        let token = self.peek();
        if !token.spaced {
            return false;
        }
        let next_spaced = self.peek_next().spaced;
        match token.kind {
            TokenKind::Integer
            | TokenKind::Float
            | TokenKind::String
            | TokenKind::Symbol
            | TokenKind::Identifier
            | TokenKind::Constant
            | TokenKind::Ivar
            | TokenKind::Cvar
            | TokenKind::Gvar
            | TokenKind::Label
            | TokenKind::Nil
            | TokenKind::True
            | TokenKind::False
            | TokenKind::SelfKw
            | TokenKind::LeftBracket
            | TokenKind::LeftParen
            | TokenKind::Bang
            | TokenKind::Tilde
            | TokenKind::Def => true,
            TokenKind::Minus
            | TokenKind::Amp
            | TokenKind::ColonColon
            | TokenKind::Star
            | TokenKind::StarStar => !next_spaced,
            _ => false,
        }
    }

    /// Any token that may begin an operand (used for optional values)
    pub(super) fn starts_expression(&self) -> bool {
        !matches!(
            self.peek().kind,
            TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::Eof
                | TokenKind::RightParen
                | TokenKind::RightBracket
                | TokenKind::RightBrace
                | TokenKind::Comma
                | TokenKind::Colon
                | TokenKind::FatArrow
                | TokenKind::End
                | TokenKind::Then
                | TokenKind::Do
                | TokenKind::Else
                | TokenKind::Elsif
                | TokenKind::If
                | TokenKind::Unless
                | TokenKind::While
                | TokenKind::Until
                | TokenKind::And
                | TokenKind::Or
                | TokenKind::Pipe
        )
    }

    fn parse_block_if_present(&mut self, call: Node) -> Result<Node, ()> {
        let brace = self.check(TokenKind::LeftBrace);
        let do_block = self.check(TokenKind::Do) && self.do_allowed;
        if !brace && !do_block {
            return Ok(call);
        }

        let open = self.advance().span;
        self.push_scope(false);
        let result = self.parse_block_rest(if brace {
            TokenKind::RightBrace
        } else {
            TokenKind::End
        });
        self.pop_scope();
        let (params, params_span, body, close) = result?;

        let span = call.span.merge(close);
        Ok(self.node(
            NodeKind::Block {
                call: Box::new(call),
                params,
                params_span,
                body,
                open,
                close,
            },
            span,
        ))
    }

    /// Parameters, body and closing delimiter of a block
    #[allow(clippy::type_complexity)]
    fn parse_block_rest(
        &mut self,
        terminator: TokenKind,
    ) -> Result<(Vec<String>, Option<Span>, Option<Box<Node>>, Span), ()> {
        let mut params = Vec::new();
        let mut params_span = None;

        if self.check(TokenKind::PipePipe) {
            params_span = Some(self.advance().span);
        } else if self.check(TokenKind::Pipe) {
            let open = self.advance().span;
            while !self.check(TokenKind::Pipe) {
                if self.check(TokenKind::Star) || self.check(TokenKind::Amp) {
                    self.advance();
                }
                let name = self.consume(TokenKind::Identifier, "Expected block parameter name")?;
                self.declare_local(&name.lexeme);
                params.push(name.lexeme);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
            let close = self
                .consume(TokenKind::Pipe, "Expected '|' after block parameters")?
                .span;
            params_span = Some(open.merge(close));
        }

        let statements = self.with_do_allowed(true, |p| p.parse_statements(&[terminator]))?;
        let message = if terminator == TokenKind::End {
            "Expected 'end' to close block"
        } else {
            "Expected '}' to close block"
        };
        let close = self.consume(terminator, message)?.span;
        let body = self.body(statements);
        Ok((params, params_span, body, close))
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{Node, NodeKind};
    use crate::parser::{RubyParser, ScriptParser};
    use pretty_assertions::assert_eq;

    fn expr(source: &str) -> Node {
        let mut program = RubyParser.parse(source).unwrap();
        assert_eq!(program.statements.len(), 1, "expected one statement");
        program.statements.remove(0)
    }

    fn send_parts(node: &Node) -> (Option<&Node>, &str, &[Node]) {
        match &node.kind {
            NodeKind::Send {
                receiver,
                method,
                args,
                ..
            } => (receiver.as_deref(), method.as_str(), args.as_slice()),
            other => panic!("expected send, got {:?}", other),
        }
    }

    #[test]
    fn test_binary_precedence() {
        let node = expr("1 + 2 * 3");
        let (receiver, method, args) = send_parts(&node);
        assert_eq!(method, "+");
        assert_eq!(receiver.map(|r| &r.kind), Some(&NodeKind::Int(1)));
        assert_eq!(send_parts(&args[0]).1, "*");
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let node = expr("-2 ** 2");
        let (receiver, method, _) = send_parts(&node);
        assert_eq!(method, "-@");
        assert_eq!(send_parts(receiver.unwrap()).1, "**");
    }

    #[test]
    fn test_negative_literal() {
        assert_eq!(expr("-5").kind, NodeKind::Int(-5));
    }

    #[test]
    fn test_command_call_arguments() {
        let node = expr("puts 1, key: 2");
        let (receiver, method, args) = send_parts(&node);
        assert!(receiver.is_none());
        assert_eq!(method, "puts");
        assert_eq!(args.len(), 2);
        assert!(matches!(args[1].kind, NodeKind::Hash(_)));
    }

    #[test]
    fn test_spaced_minus_after_local_is_binary() {
        let program = RubyParser.parse("x = 1\nx -1").unwrap();
        let (_, method, _) = send_parts(&program.statements[1]);
        assert_eq!(method, "-");
    }

    #[test]
    fn test_method_chain_with_safe_navigation() {
        let node = expr("a&.b.c(1)");
        match &node.kind {
            NodeKind::Send {
                receiver: Some(inner),
                method,
                ..
            } => {
                assert_eq!(method, "c");
                assert_eq!(inner.kind_name(), "csend");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_index_and_attribute_assignment() {
        let program = RubyParser.parse("h = {}\nh[:a] = 1\nh.size = 2").unwrap();
        assert_eq!(send_parts(&program.statements[1]).1, "[]=");
        assert_eq!(send_parts(&program.statements[1]).2.len(), 2);
        assert_eq!(send_parts(&program.statements[2]).1, "size=");
    }

    #[test]
    fn test_op_assign_declares_local() {
        let program = RubyParser.parse("total ||= nil\ntotal").unwrap();
        match &program.statements[0].kind {
            NodeKind::OpAsgn { target, op, .. } => {
                assert_eq!(op, "||");
                assert_eq!(target.kind, NodeKind::Lvar("total".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            program.statements[1].kind,
            NodeKind::Lvar("total".to_string())
        );
    }

    #[test]
    fn test_ternary() {
        let node = expr("a ? 1 : 2");
        assert_eq!(node.kind_name(), "if");
    }

    #[test]
    fn test_block_forms() {
        let node = expr("list.each do |a, b|\n  a\nend");
        match &node.kind {
            NodeKind::Block {
                params,
                params_span,
                body,
                ..
            } => {
                assert_eq!(params, &vec!["a".to_string(), "b".to_string()]);
                assert!(params_span.is_some());
                assert_eq!(body.as_ref().unwrap().kind, NodeKind::Lvar("a".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_do_block_binds_to_outer_command_call() {
        let node = expr("foo bar do\nend");
        match &node.kind {
            NodeKind::Block { call, .. } => assert_eq!(send_parts(call).1, "foo"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_block_pass_argument() {
        let node = expr("list.map(&:upcase)");
        let (_, _, args) = send_parts(&node);
        match &args[0].kind {
            NodeKind::BlockPass(inner) => assert_eq!(inner.kind, NodeKind::Sym("upcase".into())),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_constant_path() {
        let node = expr("::Foo::Bar");
        assert_eq!(node.const_path().as_deref(), Some("::Foo::Bar"));
    }

    #[test]
    fn test_leading_dot_chain() {
        let node = expr("list\n  .first");
        assert_eq!(send_parts(&node).1, "first");
    }

    #[test]
    fn test_hash_literal_pairs() {
        let node = expr("{ a: 1, 'b' => 2 }");
        match &node.kind {
            NodeKind::Hash(pairs) => assert_eq!(pairs.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}
