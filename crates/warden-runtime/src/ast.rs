//! Abstract Syntax Tree (AST) definitions
//!
//! The tree shape follows the script dialect the rewriter instruments. Every
//! node carries a [`NodeId`] unique within one parse and the byte [`Span`] of
//! its source text; the rewriter never mutates nodes and keeps its own side
//! tables keyed by id.

use crate::span::Span;

/// Identity of a node within one parsed program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Top-level statement stream
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Node>,
    pub span: Span,
}

/// A syntax node
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub span: Span,
}

/// Node payloads
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    // Literals
    Int(i64),
    Float(f64),
    Str(String),
    Sym(String),
    True,
    False,
    Nil,
    Array(Vec<Node>),
    /// Hash literal; children are `Pair` nodes
    Hash(Vec<Node>),
    Pair {
        key: Box<Node>,
        value: Box<Node>,
    },
    Range {
        from: Option<Box<Node>>,
        to: Option<Box<Node>>,
        exclusive: bool,
    },

    // Variables and constants
    SelfRef,
    Lvar(String),
    Ivar(String),
    Cvar(String),
    Gvar(String),
    /// Constant read; `scope` is the left side of `A::B`, `top_level` marks `::B`
    Const {
        scope: Option<Box<Node>>,
        name: String,
        top_level: bool,
    },

    // Assignments
    Lvasgn {
        name: String,
        value: Box<Node>,
    },
    Ivasgn {
        name: String,
        value: Box<Node>,
    },
    Cvasgn {
        name: String,
        value: Box<Node>,
    },
    Gvasgn {
        name: String,
        value: Box<Node>,
    },
    Casgn {
        scope: Option<Box<Node>>,
        name: String,
        value: Box<Node>,
    },
    /// `target op= value`; `op` is `+`, `-`, `||`, `&&`, ...; `target` is
    /// the read form (Lvar, Ivar, Const, Send, ...)
    OpAsgn {
        target: Box<Node>,
        op: String,
        value: Box<Node>,
    },

    // Calls
    Send {
        receiver: Option<Box<Node>>,
        method: String,
        args: Vec<Node>,
        /// `recv&.method`
        safe_nav: bool,
        /// Span of the method name token
        selector: Span,
    },
    /// `&expr` argument
    BlockPass(Box<Node>),
    Block {
        call: Box<Node>,
        params: Vec<String>,
        /// Span of `|a, b|` if present
        params_span: Option<Span>,
        body: Option<Box<Node>>,
        /// `{` or `do`
        open: Span,
        /// `}` or `end`
        close: Span,
    },

    // Control flow
    /// Implicit statement sequence or parenthesized expression
    Begin(Vec<Node>),
    /// Explicit `begin ... end`; `keyword` is the `begin` token
    KwBegin {
        body: Vec<Node>,
        keyword: Span,
    },
    If {
        cond: Box<Node>,
        then_branch: Option<Box<Node>>,
        else_branch: Option<Box<Node>>,
    },
    While {
        cond: Box<Node>,
        body: Option<Box<Node>>,
        do_keyword: Option<Span>,
    },
    Until {
        cond: Box<Node>,
        body: Option<Box<Node>>,
        do_keyword: Option<Span>,
    },
    For {
        var: String,
        var_span: Span,
        iter: Box<Node>,
        body: Option<Box<Node>>,
        do_keyword: Option<Span>,
    },
    And {
        left: Box<Node>,
        right: Box<Node>,
    },
    Or {
        left: Box<Node>,
        right: Box<Node>,
    },
    Return(Option<Box<Node>>),
    Break(Option<Box<Node>>),
    Next(Option<Box<Node>>),
    Redo,
    Retry,
    Yield(Vec<Node>),

    // Declarations
    Def {
        /// `def self.name` receiver
        singleton: Option<Box<Node>>,
        name: String,
        params: Vec<String>,
        /// Default value expressions, in parameter order
        defaults: Vec<Node>,
        body: Option<Box<Node>>,
    },
    Class {
        name: Box<Node>,
        superclass: Option<Box<Node>>,
        body: Option<Box<Node>>,
    },
    Module {
        name: Box<Node>,
        body: Option<Box<Node>>,
    },
}

impl Node {
    /// Literal values are never wrapped or unwrapped by the rewriter.
    /// Array and hash literals count: they are raw containers whose elements
    /// are unwrapped individually.
    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Int(_)
                | NodeKind::Float(_)
                | NodeKind::Str(_)
                | NodeKind::Sym(_)
                | NodeKind::True
                | NodeKind::False
                | NodeKind::Nil
                | NodeKind::Array(_)
                | NodeKind::Hash(_)
        )
    }

    /// Literals of primitive values (no containers)
    pub fn is_scalar_literal(&self) -> bool {
        self.is_literal() && !matches!(self.kind, NodeKind::Array(_) | NodeKind::Hash(_))
    }

    pub fn is_const(&self) -> bool {
        matches!(self.kind, NodeKind::Const { .. })
    }

    /// Short tag for the node kind, used in diagnostics and logs
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Int(_) => "int",
            NodeKind::Float(_) => "float",
            NodeKind::Str(_) => "str",
            NodeKind::Sym(_) => "sym",
            NodeKind::True => "true",
            NodeKind::False => "false",
            NodeKind::Nil => "nil",
            NodeKind::Array(_) => "array",
            NodeKind::Hash(_) => "hash",
            NodeKind::Pair { .. } => "pair",
            NodeKind::Range { .. } => "range",
            NodeKind::SelfRef => "self",
            NodeKind::Lvar(_) => "lvar",
            NodeKind::Ivar(_) => "ivar",
            NodeKind::Cvar(_) => "cvar",
            NodeKind::Gvar(_) => "gvar",
            NodeKind::Const { .. } => "const",
            NodeKind::Lvasgn { .. } => "lvasgn",
            NodeKind::Ivasgn { .. } => "ivasgn",
            NodeKind::Cvasgn { .. } => "cvasgn",
            NodeKind::Gvasgn { .. } => "gvasgn",
            NodeKind::Casgn { .. } => "casgn",
            NodeKind::OpAsgn { .. } => "op_asgn",
            NodeKind::Send { safe_nav: true, .. } => "csend",
            NodeKind::Send { .. } => "send",
            NodeKind::BlockPass(_) => "block_pass",
            NodeKind::Block { .. } => "block",
            NodeKind::Begin(_) => "begin",
            NodeKind::KwBegin { .. } => "kwbegin",
            NodeKind::If { .. } => "if",
            NodeKind::While { .. } => "while",
            NodeKind::Until { .. } => "until",
            NodeKind::For { .. } => "for",
            NodeKind::And { .. } => "and",
            NodeKind::Or { .. } => "or",
            NodeKind::Return(_) => "return",
            NodeKind::Break(_) => "break",
            NodeKind::Next(_) => "next",
            NodeKind::Redo => "redo",
            NodeKind::Retry => "retry",
            NodeKind::Yield(_) => "yield",
            NodeKind::Def { .. } => "def",
            NodeKind::Class { .. } => "class",
            NodeKind::Module { .. } => "module",
        }
    }

    /// Fully qualified constant path (`A::B::C`) for constant nodes
    pub fn const_path(&self) -> Option<String> {
        match &self.kind {
            NodeKind::Const {
                scope,
                name,
                top_level,
            } => {
                let prefix = match scope {
                    Some(scope) => format!("{}::", scope.const_path()?),
                    None if *top_level => "::".to_string(),
                    None => String::new(),
                };
                Some(format!("{}{}", prefix, name))
            }
            _ => None,
        }
    }

    /// Direct children in source order
    pub fn children(&self) -> Vec<&Node> {
        fn opt(node: &Option<Box<Node>>) -> Option<&Node> {
            node.as_deref()
        }
        match &self.kind {
            NodeKind::Int(_)
            | NodeKind::Float(_)
            | NodeKind::Str(_)
            | NodeKind::Sym(_)
            | NodeKind::True
            | NodeKind::False
            | NodeKind::Nil
            | NodeKind::SelfRef
            | NodeKind::Lvar(_)
            | NodeKind::Ivar(_)
            | NodeKind::Cvar(_)
            | NodeKind::Gvar(_)
            | NodeKind::Redo
            | NodeKind::Retry => Vec::new(),
            NodeKind::Array(items)
            | NodeKind::Hash(items)
            | NodeKind::Begin(items)
            | NodeKind::Yield(items) => items.iter().collect(),
            NodeKind::KwBegin { body, .. } => body.iter().collect(),
            NodeKind::Pair { key, value } => vec![key.as_ref(), value.as_ref()],
            NodeKind::Range { from, to, .. } => opt(from).into_iter().chain(opt(to)).collect(),
            NodeKind::Const { scope, .. } => opt(scope).into_iter().collect(),
            NodeKind::Lvasgn { value, .. }
            | NodeKind::Ivasgn { value, .. }
            | NodeKind::Cvasgn { value, .. }
            | NodeKind::Gvasgn { value, .. } => vec![value.as_ref()],
            NodeKind::Casgn { scope, value, .. } => {
                opt(scope).into_iter().chain(Some(value.as_ref())).collect()
            }
            NodeKind::OpAsgn { target, value, .. } => vec![target.as_ref(), value.as_ref()],
            NodeKind::Send { receiver, args, .. } => {
                opt(receiver).into_iter().chain(args.iter()).collect()
            }
            NodeKind::BlockPass(inner) => vec![inner.as_ref()],
            NodeKind::Block { call, body, .. } => {
                std::iter::once(call.as_ref()).chain(opt(body)).collect()
            }
            NodeKind::If {
                cond,
                then_branch,
                else_branch,
            } => std::iter::once(cond.as_ref())
                .chain(opt(then_branch))
                .chain(opt(else_branch))
                .collect(),
            NodeKind::While { cond, body, .. } | NodeKind::Until { cond, body, .. } => {
                std::iter::once(cond.as_ref()).chain(opt(body)).collect()
            }
            NodeKind::For { iter, body, .. } => {
                std::iter::once(iter.as_ref()).chain(opt(body)).collect()
            }
            NodeKind::And { left, right } | NodeKind::Or { left, right } => {
                vec![left.as_ref(), right.as_ref()]
            }
            NodeKind::Return(value) | NodeKind::Break(value) | NodeKind::Next(value) => {
                opt(value).into_iter().collect()
            }
            NodeKind::Def {
                singleton,
                defaults,
                body,
                ..
            } => opt(singleton)
                .into_iter()
                .chain(defaults)
                .chain(opt(body))
                .collect(),
            NodeKind::Class {
                name,
                superclass,
                body,
            } => std::iter::once(name.as_ref())
                .chain(opt(superclass))
                .chain(opt(body))
                .collect(),
            NodeKind::Module { name, body } => {
                std::iter::once(name.as_ref()).chain(opt(body)).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32, kind: NodeKind, start: usize, end: usize) -> Node {
        Node {
            id: NodeId(id),
            kind,
            span: Span::new(start, end),
        }
    }

    #[test]
    fn test_literal_classification() {
        assert!(node(0, NodeKind::Int(1), 0, 1).is_literal());
        assert!(node(0, NodeKind::Array(vec![]), 0, 2).is_literal());
        assert!(!node(0, NodeKind::Lvar("x".into()), 0, 1).is_literal());
        assert!(!node(0, NodeKind::SelfRef, 0, 4).is_literal());
    }

    #[test]
    fn test_const_path() {
        let inner = node(
            0,
            NodeKind::Const {
                scope: None,
                name: "Foo".into(),
                top_level: true,
            },
            0,
            5,
        );
        let outer = node(
            1,
            NodeKind::Const {
                scope: Some(Box::new(inner)),
                name: "Bar".into(),
                top_level: false,
            },
            0,
            10,
        );
        assert_eq!(outer.const_path().as_deref(), Some("::Foo::Bar"));
    }

    #[test]
    fn test_children_in_source_order() {
        let recv = node(0, NodeKind::Lvar("a".into()), 0, 1);
        let arg = node(1, NodeKind::Int(2), 6, 7);
        let send = node(
            2,
            NodeKind::Send {
                receiver: Some(Box::new(recv)),
                method: "push".into(),
                args: vec![arg],
                safe_nav: false,
                selector: Span::new(2, 6),
            },
            0,
            8,
        );
        let ids: Vec<u32> = send.children().iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(send.kind_name(), "send");
    }
}
