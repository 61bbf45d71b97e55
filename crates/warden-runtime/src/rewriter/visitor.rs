//! Instrumenting traversal
//!
//! One depth-first walk over the tree. Children are visited before the
//! parent schedules its own edits, so edits on a node are discovered inner
//! first. Nodes are never changed; `wrapped` and `unwrap_exempt` record
//! per-node decisions by id.

use super::context::{Checkpoint, Context};
use super::edits::{EditError, EditSet};
use super::guards::GuardCounters;
use super::{RewriteOptions, Violation};
use crate::ast::{Node, NodeId, NodeKind, Program};
use crate::policy::{DeclarationKind, Policy, RUNTIME_CONSTANT};
use crate::proxy::UNWRAP_METHOD;
use crate::span::Span;
use crate::value::Value;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

/// Traversal result when violations do not halt
#[derive(Debug)]
pub(super) struct Instrumented {
    pub code: String,
    pub violations: Vec<Violation>,
    pub self_sends: BTreeSet<String>,
}

#[derive(Debug)]
pub(super) enum Stop {
    Violation(Violation),
    /// Conflicting edits, with the violations reported before them
    Edit {
        error: EditError,
        violations: Vec<Violation>,
    },
}

type Visit = Result<(), Violation>;

pub(super) struct Rewriter<'a> {
    source: &'a str,
    policy: &'a Policy,
    options: &'a RewriteOptions,
    edits: EditSet,
    counters: GuardCounters,
    wrapped: HashSet<NodeId>,
    unwrap_exempt: HashSet<NodeId>,
    /// Modifier bodies already parenthesized
    opened: HashSet<Span>,
    violations: Vec<Violation>,
    self_sends: BTreeSet<String>,
}

impl<'a> Rewriter<'a> {
    pub fn new(source: &'a str, policy: &'a Policy, options: &'a RewriteOptions) -> Self {
        Self {
            source,
            policy,
            options,
            edits: EditSet::new(),
            counters: GuardCounters::new(
                options.iteration_counter_prefix.clone(),
                options.invoke_counter_prefix.clone(),
            ),
            wrapped: HashSet::new(),
            unwrap_exempt: HashSet::new(),
            opened: HashSet::new(),
            violations: Vec::new(),
            self_sends: BTreeSet::new(),
        }
    }

    /// Walk `program` and render the instrumented text. Counter
    /// initializers go at `code_start`.
    pub fn run(mut self, program: &Program, code_start: usize) -> Result<Instrumented, Stop> {
        for statement in &program.statements {
            self.visit(statement, Context::top_level(statement.span))
                .map_err(Stop::Violation)?;
        }

        debug!(
            event = "rewrite.edits",
            edits = self.edits.len(),
            loop_sites = self.counters.iteration_sites(),
            limited_methods = self.counters.limited_methods().len()
        );
        let prelude = self.counters.initializers();
        let code = match self.edits.apply_with_prelude(self.source, code_start, &prelude) {
            Ok(code) => code,
            Err(error) => {
                return Err(Stop::Edit {
                    error,
                    violations: self.violations,
                })
            }
        };
        Ok(Instrumented {
            code,
            violations: self.violations,
            self_sends: self.self_sends,
        })
    }

    // === Reporting ===

    fn report(&mut self, violation: Violation) -> Visit {
        if self.options.halt_on_error {
            return Err(violation);
        }
        warn!(event = "rewrite.violation", message = %violation);
        self.violations.push(violation);
        Ok(())
    }

    fn declare(&mut self, kind: DeclarationKind, span: Span) -> Visit {
        if self.policy.can_declare(kind) {
            Ok(())
        } else {
            self.report(Violation::DeniedDeclaration { kind, span })
        }
    }

    // === Traversal ===

    fn visit(&mut self, node: &Node, ctx: Context) -> Visit {
        match &node.kind {
            NodeKind::Int(_)
            | NodeKind::Float(_)
            | NodeKind::Str(_)
            | NodeKind::Sym(_)
            | NodeKind::True
            | NodeKind::False
            | NodeKind::Nil
            | NodeKind::Lvar(_)
            | NodeKind::Redo
            | NodeKind::Retry => Ok(()),

            NodeKind::Array(items) => {
                self.visit_all(items, ctx.expression())?;
                for item in items {
                    self.unwrap(item);
                }
                Ok(())
            }
            NodeKind::Hash(pairs) => self.visit_all(pairs, ctx.expression()),
            NodeKind::Pair { key, value } => {
                self.visit(key, ctx.expression())?;
                self.visit(value, ctx.expression())?;
                self.unwrap(value);
                Ok(())
            }
            NodeKind::Range { .. }
            | NodeKind::And { .. }
            | NodeKind::Or { .. }
            | NodeKind::BlockPass(_)
            | NodeKind::Break(_)
            | NodeKind::Next(_) => self.visit_all(node.children(), ctx.expression()),
            NodeKind::Const { scope, .. } => {
                self.check_constant(node);
                match scope {
                    Some(scope) => self.visit_name(scope, ctx),
                    None => Ok(()),
                }
            }

            NodeKind::SelfRef => self.declare(DeclarationKind::SelfRef, node.span),
            NodeKind::Ivar(_) => self.declare(DeclarationKind::Ivar, node.span),
            NodeKind::Cvar(_) => self.declare(DeclarationKind::Cvar, node.span),
            NodeKind::Gvar(_) => self.declare(DeclarationKind::Gvar, node.span),
            NodeKind::Ivasgn { value, .. } => {
                self.declare(DeclarationKind::Ivar, node.span)?;
                self.visit(value, ctx.expression())
            }
            NodeKind::Cvasgn { value, .. } => {
                self.declare(DeclarationKind::Cvar, node.span)?;
                self.visit(value, ctx.expression())
            }
            NodeKind::Gvasgn { value, .. } => {
                self.declare(DeclarationKind::Gvar, node.span)?;
                self.visit(value, ctx.expression())
            }
            NodeKind::Casgn { scope, value, .. } => {
                self.declare(DeclarationKind::Constant, node.span)?;
                if let Some(scope) = scope {
                    self.visit_name(scope, ctx)?;
                }
                self.visit(value, ctx.expression())?;
                self.wrap(value);
                Ok(())
            }
            NodeKind::Lvasgn { value, .. } => {
                let checkpoint = ctx.before_if_statement(node.span);
                self.visit(value, ctx.expression().with_checkpoint(checkpoint))?;
                self.wrap(value);
                Ok(())
            }
            NodeKind::OpAsgn { target, value, .. } => {
                if target.is_const() {
                    self.declare(DeclarationKind::Constant, node.span)?;
                }
                let inner = ctx
                    .expression()
                    .with_checkpoint(ctx.before_if_statement(node.span));
                self.visit_name(target, inner)?;
                self.visit(value, inner)?;
                if matches!(target.kind, NodeKind::Lvar(_)) {
                    self.wrap(value);
                }
                Ok(())
            }
            NodeKind::Return(value) => {
                self.declare(DeclarationKind::Return, node.span)?;
                if let Some(value) = value {
                    self.visit(value, ctx.expression())?;
                    self.wrap(value);
                }
                Ok(())
            }
            NodeKind::Yield(args) => {
                self.declare(DeclarationKind::Yield, node.span)?;
                self.visit_all(args, ctx.expression())
            }

            NodeKind::Send {
                receiver,
                method,
                args,
                safe_nav,
                ..
            } => self.visit_send(node, receiver.as_deref(), method, args, *safe_nav, ctx),
            NodeKind::Block { .. } => self.visit_block(node, ctx),

            NodeKind::Begin(statements) => self.visit_all(statements, ctx.statement()),
            NodeKind::KwBegin { body, keyword } => {
                if self.policy.maximum_iterations().is_some() {
                    let snippet = self.counters.iteration_snippet();
                    self.edits.insert_after(*keyword, snippet);
                }
                self.visit_all(body, ctx.statement())
            }
            NodeKind::If { .. } => self.visit_if(node, ctx, None),
            NodeKind::While { cond, body, do_keyword } | NodeKind::Until { cond, body, do_keyword } => {
                self.visit_loop(cond, body.as_deref(), *do_keyword, ctx)
            }
            NodeKind::For {
                iter,
                body,
                do_keyword,
                ..
            } => {
                let header = do_keyword.unwrap_or(iter.span);
                if self.policy.maximum_iterations().is_some() {
                    let snippet = self.counters.iteration_snippet();
                    self.edits.insert_after(header, snippet);
                }
                let iter_ctx = ctx
                    .expression()
                    .with_checkpoint(ctx.before_if_statement(node.span));
                self.visit(iter, iter_ctx)?;
                if let Some(body) = body {
                    let body_ctx = ctx
                        .statement()
                        .with_checkpoint(Checkpoint::Before(body.span));
                    self.visit(body, body_ctx)?;
                }
                Ok(())
            }

            NodeKind::Def {
                singleton,
                defaults,
                body,
                ..
            } => {
                self.declare(DeclarationKind::Def, node.span)?;
                if let Some(singleton) = singleton {
                    self.visit_name(singleton, ctx)?;
                }
                for default in defaults {
                    self.visit(default, ctx.expression())?;
                    self.wrap(default);
                }
                self.visit_body(body.as_deref(), ctx)
            }
            NodeKind::Class {
                name,
                superclass,
                body,
            } => {
                self.declare(DeclarationKind::Class, node.span)?;
                self.visit_name(name, ctx)?;
                if let Some(superclass) = superclass {
                    self.visit_name(superclass, ctx)?;
                }
                self.visit_body(body.as_deref(), ctx)
            }
            NodeKind::Module { name, body } => {
                self.declare(DeclarationKind::Module, node.span)?;
                self.visit_name(name, ctx)?;
                self.visit_body(body.as_deref(), ctx)
            }
        }
    }

    fn visit_all<'n>(&mut self, nodes: impl IntoIterator<Item = &'n Node>, ctx: Context) -> Visit {
        nodes.into_iter().try_for_each(|node| self.visit(node, ctx))
    }

    /// A constant that names a class, module, superclass, assignment target
    /// or scope is not a value read. Static paths are left alone; any
    /// dynamic scope inside is visited as an expression.
    fn visit_name(&mut self, node: &Node, ctx: Context) -> Visit {
        match &node.kind {
            NodeKind::Const {
                scope: Some(scope), ..
            } => self.visit_name(scope, ctx),
            NodeKind::Const { .. } => Ok(()),
            _ => self.visit(node, ctx.expression()),
        }
    }

    fn visit_body(&mut self, body: Option<&Node>, ctx: Context) -> Visit {
        match body {
            Some(body) => self.visit(body, ctx.statement()),
            None => Ok(()),
        }
    }

    fn visit_send(
        &mut self,
        node: &Node,
        receiver: Option<&Node>,
        method: &str,
        args: &[Node],
        safe_nav: bool,
        ctx: Context,
    ) -> Visit {
        let inner = ctx.expression();
        if let Some(receiver) = receiver {
            self.visit(receiver, inner)?;
        }
        self.visit_all(args, inner)?;

        if !self.policy.allows_invocation(method) {
            self.report(Violation::DeniedInvocation {
                name: method.to_string(),
                span: node.span,
            })?;
        }

        match receiver {
            Some(receiver) => self.wrap(receiver),
            None if !safe_nav => self.self_send(node, method)?,
            None => {}
        }

        if self.policy.maximum_invocations_of(method).is_some() {
            let snippet = self.counters.invocation_snippet(method);
            self.schedule(ctx.checkpoint, snippet);
        }

        if let Some(symbol) = symbol_block_target(method, args) {
            self.rewrite_symbol_block(node, method, args, symbol)?;
        }

        for arg in args {
            self.unwrap(arg);
        }
        Ok(())
    }

    /// Receiverless call: route through the proxy of `self`
    fn self_send(&mut self, node: &Node, method: &str) -> Visit {
        let options = self.options;
        if let Some(linker) = &options.self_linker {
            if !linker.link(method) {
                self.report(Violation::UnlinkedSelfSend {
                    name: method.to_string(),
                    span: node.span,
                })?;
            }
        }
        self.self_sends.insert(method.to_string());

        let prefix = match &options.self_send_prefixer {
            Some(prefixer) => prefixer.prefix(method, options.self_linker.as_deref()),
            None => String::new(),
        };
        self.edits.insert_before(
            Span::at(node.span.start),
            format!("::{}.handle(self).{}", RUNTIME_CONSTANT, prefix),
        );
        Ok(())
    }

    fn visit_block(&mut self, node: &Node, ctx: Context) -> Visit {
        let NodeKind::Block {
            call,
            params_span,
            body,
            open,
            close,
            ..
        } = &node.kind
        else {
            return Ok(());
        };

        if open.text(self.source) == "do" && !is_command_call(call) {
            self.edits.replace(*open, "{");
            self.edits.replace(*close, "}");
        }

        let entry = params_span.unwrap_or(*open);
        if self.policy.maximum_iterations().is_some() {
            let snippet = self.counters.iteration_snippet();
            self.edits.insert_after(entry, snippet);
        }

        self.visit(call, ctx)?;
        if let Some(body) = body {
            let body_ctx = ctx.statement().with_checkpoint(Checkpoint::After(entry));
            self.visit(body, body_ctx)?;
        }
        Ok(())
    }

    /// `test_checkpoint` is set for `elsif` clauses, whose test belongs to
    /// the enclosing `if`
    fn visit_if(&mut self, node: &Node, ctx: Context, test_checkpoint: Option<Checkpoint>) -> Visit {
        let NodeKind::If {
            cond,
            then_branch,
            else_branch,
        } = &node.kind
        else {
            return Ok(());
        };
        let branches = [then_branch.as_deref(), else_branch.as_deref()];

        let modifier = branches
            .iter()
            .flatten()
            .any(|branch| branch.span.start < cond.span.start);
        if modifier {
            let test = ctx.before_if_statement(node.span);
            self.visit(cond, ctx.expression().with_checkpoint(test))?;
            for branch in branches.into_iter().flatten() {
                let wrapped = ctx.expression().with_checkpoint(Checkpoint::Wrapped(branch.span));
                self.visit(branch, wrapped)?;
            }
            return Ok(());
        }

        // Ternary: branches are expressions, nothing can be inserted inside
        if cond.span.start == node.span.start {
            self.visit(cond, ctx.expression())?;
            return self.visit_all(branches.into_iter().flatten(), ctx.expression());
        }

        let test = test_checkpoint.unwrap_or_else(|| ctx.before_if_statement(node.span));
        self.visit(cond, ctx.expression().with_checkpoint(test))?;
        if let Some(branch) = then_branch {
            self.visit_branch(branch, ctx)?;
        }
        match else_branch {
            Some(branch) if self.is_elsif(branch) => self.visit_if(branch, ctx, Some(test)),
            Some(branch) => self.visit_branch(branch, ctx),
            None => Ok(()),
        }
    }

    fn visit_branch(&mut self, branch: &Node, ctx: Context) -> Visit {
        let branch_ctx = ctx
            .statement()
            .with_checkpoint(Checkpoint::Before(branch.span));
        self.visit(branch, branch_ctx)
    }

    fn is_elsif(&self, node: &Node) -> bool {
        matches!(node.kind, NodeKind::If { .. })
            && self.source[node.span.start..].starts_with("elsif")
    }

    fn visit_loop(
        &mut self,
        cond: &Node,
        body: Option<&Node>,
        do_keyword: Option<Span>,
        ctx: Context,
    ) -> Visit {
        let limited = self.policy.maximum_iterations().is_some();
        let modifier = body.is_some_and(|body| body.span.start < cond.span.start);

        let inner = match body {
            // `begin ... end while cond`: the begin block counts its own runs
            Some(body) if modifier => match &body.kind {
                NodeKind::KwBegin { keyword, .. } => {
                    ctx.expression().with_checkpoint(Checkpoint::After(*keyword))
                }
                _ => {
                    let checkpoint = Checkpoint::Wrapped(body.span);
                    if limited {
                        let snippet = self.counters.iteration_snippet();
                        self.schedule(checkpoint, snippet);
                    }
                    ctx.expression().with_checkpoint(checkpoint)
                }
            },
            _ => {
                let entry = do_keyword.unwrap_or(cond.span);
                if limited {
                    let snippet = self.counters.iteration_snippet();
                    self.edits.insert_after(entry, snippet);
                }
                ctx.expression().with_checkpoint(Checkpoint::After(entry))
            }
        };

        if modifier {
            if let Some(body) = body {
                self.visit(body, inner)?;
            }
            self.visit(cond, inner)
        } else {
            self.visit(cond, inner)?;
            self.visit_body(body, inner)
        }
    }

    // === Edits ===

    fn schedule(&mut self, checkpoint: Checkpoint, snippet: String) {
        match checkpoint {
            Checkpoint::Before(span) => self.edits.insert_before(span, snippet),
            Checkpoint::After(span) => self.edits.insert_after(span, snippet),
            Checkpoint::Wrapped(span) => {
                if self.opened.insert(span) {
                    self.edits.insert_before(span, "(");
                    self.edits.insert_after(span, ")");
                }
                self.edits.insert_before(span, snippet);
            }
        }
    }

    /// Route a value through the proxy constructor, once per node
    fn wrap(&mut self, node: &Node) {
        if node.is_scalar_literal() && !self.literal_has_type_rule(node) {
            return;
        }
        if !self.wrapped.insert(node.id) {
            return;
        }
        let handle = format!("::{}.handle(", RUNTIME_CONSTANT);
        self.edits.insert_before(node.span, handle);
        self.edits.insert_after(node.span, ")");
    }

    /// Check a constant read through the proxy constructor, wherever the
    /// read sits. Zero-width anchors keep the check innermost among the
    /// edits on the same node; it is scheduled before the scope is visited
    /// so it also encloses edits at the scope's start. The node counts as
    /// wrapped.
    fn check_constant(&mut self, node: &Node) {
        self.wrapped.insert(node.id);
        self.edits.insert_before(
            Span::at(node.span.start),
            format!("::{}.handle(", RUNTIME_CONSTANT),
        );
        self.edits
            .insert_after(Span::at(node.span.end), ", constant: true)");
    }

    /// Hand the raw value to a container literal or call argument
    fn unwrap(&mut self, node: &Node) {
        if node.is_literal()
            || matches!(node.kind, NodeKind::BlockPass(_))
            || self.unwrap_exempt.contains(&node.id)
        {
            return;
        }
        self.edits.insert_before(node.span, "(");
        self.edits
            .insert_after(node.span, format!(").{}", UNWRAP_METHOD));
    }

    fn literal_has_type_rule(&self, node: &Node) -> bool {
        let value = match &node.kind {
            NodeKind::Int(i) => Value::Integer(*i),
            NodeKind::Float(f) => Value::Float(*f),
            NodeKind::Str(s) => Value::string(s.as_str()),
            NodeKind::Sym(s) => Value::symbol(s.as_str()),
            NodeKind::True => Value::Bool(true),
            NodeKind::False => Value::Bool(false),
            _ => Value::Nil,
        };
        self.policy.has_type_rule_for(&value)
    }

    /// `items.map(&:name)` and `items.inject(0, :+)` become explicit blocks
    /// so the iteration, the invocation and the call go through the guards
    fn rewrite_symbol_block(&mut self, node: &Node, method: &str, args: &[Node], symbol: &str) -> Visit {
        let Some(last) = args.last() else {
            return Ok(());
        };
        if !self.policy.allows_invocation(symbol) {
            self.report(Violation::DeniedInvocation {
                name: symbol.to_string(),
                span: last.span,
            })?;
        }

        let removed = match args.len() {
            1 => last.span,
            n => Span::new(args[n - 2].span.end, last.span.end),
        };
        self.edits.remove(removed);
        self.unwrap_exempt.insert(last.id);

        let iteration = if self.policy.maximum_iterations().is_some() {
            self.counters.iteration_snippet()
        } else {
            String::new()
        };
        let invocation = if self.policy.maximum_invocations_of(symbol).is_some() {
            self.counters.invocation_snippet(symbol)
        } else {
            String::new()
        };

        let block = if is_fold(method) {
            let memo = format!("::{}.handle(memo)", RUNTIME_CONSTANT);
            let item = format!("(item).{}", UNWRAP_METHOD);
            let call = if is_operator(symbol) {
                format!("{} {} {}", memo, symbol, item)
            } else {
                format!("{}.{}({})", memo, symbol, item)
            };
            format!(" {{ |memo, item| {}{}{} }}", iteration, invocation, call)
        } else {
            format!(
                " {{ |item| {}{}::{}.handle(item).{} }}",
                iteration, invocation, RUNTIME_CONSTANT, symbol
            )
        };
        self.edits.insert_after(node.span, block);
        Ok(())
    }
}

fn is_fold(method: &str) -> bool {
    matches!(method, "inject" | "reduce")
}

fn is_operator(method: &str) -> bool {
    !method.starts_with(|c: char| c == '_' || c.is_alphabetic())
}

/// Method name of a trailing `&:name` argument, or of the symbol in
/// `inject(:+)` / `inject(init, :+)`
fn symbol_block_target<'n>(method: &str, args: &'n [Node]) -> Option<&'n str> {
    match &args.last()?.kind {
        NodeKind::BlockPass(inner) => match &inner.kind {
            NodeKind::Sym(name) => Some(name),
            _ => None,
        },
        NodeKind::Sym(name) if is_fold(method) && args.len() <= 2 => Some(name),
        _ => None,
    }
}

/// `foo arg do ... end`: braces would bind the block to `arg`
fn is_command_call(call: &Node) -> bool {
    match &call.kind {
        NodeKind::Send { args, .. } => args
            .last()
            .is_some_and(|last| last.span.end == call.span.end),
        _ => false,
    }
}
