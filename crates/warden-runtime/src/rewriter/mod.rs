//! Script rewriter and validator
//!
//! Parses a script, checks it against a [`Policy`] and instruments it:
//!
//! - values flowing into calls, assignments and `return` are routed through
//!   `::Warden.handle(...)`, and values handed to container literals or call
//!   arguments are unwrapped again with `.warden_raw`;
//! - receiverless calls are sent to `::Warden.handle(self)`;
//! - loops and blocks count their iterations, limited methods count their
//!   invocations, and the counters are zeroed at the top of the script.
//!
//! Denied constructs are reported as [`Violation`]s. With `halt_on_error`
//! the first one aborts the rewrite, otherwise they are collected in the
//! [`RewriteLog`] and the rewrite goes on.

mod context;
pub mod edits;
pub mod guards;
mod visitor;

pub use edits::{Edit, EditError, EditKind, EditSet};
pub use guards::{GuardCounters, DEFAULT_INVOKE_PREFIX, DEFAULT_ITERATION_PREFIX};

use crate::diagnostic::{error_codes, Diagnostic};
use crate::parser::{RubyParser, ScriptParser, SyntaxError};
use crate::policy::{DeclarationKind, Policy};
use crate::span::Span;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use visitor::{Rewriter, Stop};
use warden_config::PolicyConfig;

/// Decides whether a receiverless call names something the host provides
pub trait SelfLinker: Send + Sync {
    fn link(&self, method: &str) -> bool;
}

/// Text placed between `::Warden.handle(self).` and a receiverless call
pub trait SelfSendPrefixer: Send + Sync {
    fn prefix(&self, method: &str, linker: Option<&dyn SelfLinker>) -> String;
}

/// Options of one rewrite
#[derive(Clone)]
pub struct RewriteOptions {
    /// Abort on the first violation instead of logging it
    pub halt_on_error: bool,
    /// Locals the host binds before evaluation; each becomes `NAME ||= nil`
    pub locals: Vec<String>,
    pub self_linker: Option<Arc<dyn SelfLinker>>,
    pub self_send_prefixer: Option<Arc<dyn SelfSendPrefixer>>,
    pub iteration_counter_prefix: String,
    pub invoke_counter_prefix: String,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            halt_on_error: true,
            locals: Vec::new(),
            self_linker: None,
            self_send_prefixer: None,
            iteration_counter_prefix: DEFAULT_ITERATION_PREFIX.to_string(),
            invoke_counter_prefix: DEFAULT_INVOKE_PREFIX.to_string(),
        }
    }
}

impl RewriteOptions {
    /// Options from the `[rewrite]` section of a policy file
    pub fn from_config(config: &PolicyConfig) -> Self {
        let rewrite = &config.rewrite;
        let defaults = Self::default();
        Self {
            halt_on_error: config.halt_on_error(),
            locals: rewrite.locals.clone(),
            iteration_counter_prefix: rewrite
                .iteration_counter_prefix
                .clone()
                .unwrap_or(defaults.iteration_counter_prefix),
            invoke_counter_prefix: rewrite
                .invoke_counter_prefix
                .clone()
                .unwrap_or(defaults.invoke_counter_prefix),
            ..Self::default()
        }
    }

    pub fn keep_going(mut self) -> Self {
        self.halt_on_error = false;
        self
    }

    pub fn with_locals<I, S>(mut self, locals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locals.extend(locals.into_iter().map(Into::into));
        self
    }

    pub fn with_self_linker(mut self, linker: Arc<dyn SelfLinker>) -> Self {
        self.self_linker = Some(linker);
        self
    }

    pub fn with_self_send_prefixer(mut self, prefixer: Arc<dyn SelfSendPrefixer>) -> Self {
        self.self_send_prefixer = Some(prefixer);
        self
    }

    /// `NAME ||= nil` lines for the host locals
    fn locals_prelude(&self) -> String {
        self.locals
            .iter()
            .map(|local| format!("{} ||= nil\n", local))
            .collect()
    }
}

impl fmt::Debug for RewriteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RewriteOptions")
            .field("halt_on_error", &self.halt_on_error)
            .field("locals", &self.locals)
            .field("self_linker", &self.self_linker.is_some())
            .field("self_send_prefixer", &self.self_send_prefixer.is_some())
            .field("iteration_counter_prefix", &self.iteration_counter_prefix)
            .field("invoke_counter_prefix", &self.invoke_counter_prefix)
            .finish()
    }
}

/// Messages collected by a rewrite
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewriteLog {
    /// Violation and syntax error messages
    pub errors: Vec<String>,
    /// The same errors in structured form
    pub diagnostics: Vec<Diagnostic>,
    /// Names of all receiverless calls
    pub self_sends: BTreeSet<String>,
}

impl RewriteLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn clear(&mut self) {
        self.errors.clear();
        self.diagnostics.clear();
        self.self_sends.clear();
    }

    fn push(&mut self, message: String, diagnostic: Diagnostic) {
        self.errors.push(message);
        self.diagnostics.push(diagnostic);
    }
}

/// A construct the policy forbids
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("{}", .kind.message())]
    DeniedDeclaration { kind: DeclarationKind, span: Span },

    #[error("invoking method '{name}' is not allowed")]
    DeniedInvocation { name: String, span: Span },

    #[error("error linking {name}")]
    UnlinkedSelfSend { name: String, span: Span },
}

impl Violation {
    pub fn span(&self) -> Span {
        match self {
            Violation::DeniedDeclaration { span, .. }
            | Violation::DeniedInvocation { span, .. }
            | Violation::UnlinkedSelfSend { span, .. } => *span,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Violation::DeniedDeclaration { .. } => error_codes::DENIED_DECLARATION,
            Violation::DeniedInvocation { .. } => error_codes::DENIED_INVOCATION,
            Violation::UnlinkedSelfSend { .. } => error_codes::UNLINKED_SELF_SEND,
        }
    }

    /// Diagnostic pointing into `source`
    pub fn to_diagnostic(&self, source: &str) -> Diagnostic {
        let label = match self {
            Violation::DeniedDeclaration { kind, .. } => format!("{} is denied", kind),
            Violation::DeniedInvocation { .. } => "denied method".to_string(),
            Violation::UnlinkedSelfSend { .. } => "unknown method".to_string(),
        };
        Diagnostic::error_with_code(self.code(), self.to_string(), self.span())
            .with_snippet_from(source)
            .with_label(label)
    }
}

/// Rewrite failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RewriteError {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Violation(#[from] Violation),

    #[error("conflicting edits: {0}")]
    Edit(#[from] EditError),
}

/// Rewrite `source` with the built-in parser
///
/// # Examples
///
/// ```
/// use warden_runtime::{rewrite, Policy, RewriteOptions};
///
/// let policy = Policy::builder().maximum_iterations(100).build();
/// let code = rewrite("items.each { |i| puts i }", &policy, &RewriteOptions::default()).unwrap();
/// assert!(code.starts_with("_it_c_1 = 0; "));
/// assert!(code.contains("::Warden.check_iteration_counter(_it_c_1)"));
/// ```
pub fn rewrite(source: &str, policy: &Policy, options: &RewriteOptions) -> Result<String, RewriteError> {
    rewrite_with(&RubyParser, source, policy, options, None)
}

/// [`rewrite`], collecting violations, syntax errors and self sends in `log`
pub fn rewrite_logged(
    source: &str,
    policy: &Policy,
    options: &RewriteOptions,
    log: &mut RewriteLog,
) -> Result<String, RewriteError> {
    rewrite_with(&RubyParser, source, policy, options, Some(log))
}

/// Rewrite with any parser front end
///
/// A disabled policy returns the source unchanged. Syntax errors are
/// recorded in `log` as `syntax error: MESSAGE` and returned.
pub fn rewrite_with(
    parser: &dyn ScriptParser,
    source: &str,
    policy: &Policy,
    options: &RewriteOptions,
    mut log: Option<&mut RewriteLog>,
) -> Result<String, RewriteError> {
    if let Some(log) = log.as_deref_mut() {
        log.clear();
    }
    if policy.is_disabled() {
        debug!(event = "rewrite.disabled");
        return Ok(source.to_string());
    }

    let prelude = options.locals_prelude();
    let code_start = prelude.len();
    let script = format!("{}{}", prelude, source);
    debug!(event = "rewrite.start", bytes = source.len(), locals = options.locals.len());

    let program = match parser.parse(&script) {
        Ok(program) => program,
        Err(error) => {
            let error = relocate_syntax_error(error, code_start, source);
            if let Some(log) = log.as_deref_mut() {
                log.push(
                    format!("syntax error: {}", error.message()),
                    error.diagnostic.clone(),
                );
            }
            return Err(RewriteError::Syntax(error));
        }
    };

    let result = Rewriter::new(&script, policy, options).run(&program, code_start);
    match result {
        Ok(instrumented) => {
            if let Some(log) = log {
                log_violations(log, &instrumented.violations, code_start, source);
                log.self_sends = instrumented.self_sends;
            }
            debug!(event = "rewrite.done", bytes = instrumented.code.len());
            Ok(instrumented.code)
        }
        Err(Stop::Violation(violation)) => {
            if let Some(log) = log {
                let shifted = shift_violation(&violation, code_start);
                log.push(violation.to_string(), shifted.to_diagnostic(source));
            }
            Err(RewriteError::Violation(shift_violation(&violation, code_start)))
        }
        Err(Stop::Edit { error, violations }) => {
            warn!(event = "rewrite.edit_conflict", message = %error);
            if let Some(log) = log {
                log_violations(log, &violations, code_start, source);
                log.push(
                    format!("conflicting edits: {}", error),
                    edit_diagnostic(&error, code_start, source),
                );
            }
            Err(RewriteError::Edit(error))
        }
    }
}

fn log_violations(log: &mut RewriteLog, violations: &[Violation], code_start: usize, source: &str) {
    for violation in violations {
        let shifted = shift_violation(violation, code_start);
        log.push(violation.to_string(), shifted.to_diagnostic(source));
    }
}

/// Conflicting edits are an instrumentation fault, reported at the span
/// they collided on
fn edit_diagnostic(error: &EditError, code_start: usize, source: &str) -> Diagnostic {
    let span = error.span();
    let span = Span::new(
        span.start.saturating_sub(code_start).min(source.len()),
        span.end.saturating_sub(code_start).min(source.len()),
    );
    Diagnostic::error_with_code(error_codes::EDIT_CONFLICT, format!("conflicting edits: {}", error), span)
        .with_snippet_from(source)
}

/// Static check only: every violation and syntax error as a message. Never
/// fails.
pub fn validate(source: &str, policy: &Policy) -> Vec<String> {
    validate_log(source, policy).errors
}

/// [`validate`] in structured form
pub fn validate_diagnostics(source: &str, policy: &Policy) -> Vec<Diagnostic> {
    validate_log(source, policy).diagnostics
}

fn validate_log(source: &str, policy: &Policy) -> RewriteLog {
    validate_with(&RubyParser, source, policy)
}

fn validate_with(parser: &dyn ScriptParser, source: &str, policy: &Policy) -> RewriteLog {
    let options = RewriteOptions::default().keep_going();
    let mut log = RewriteLog::new();
    // Every failure, edit conflicts included, ends up in the log
    let _ = rewrite_with(parser, source, &policy.enforcing(), &options, Some(&mut log));
    log
}

/// Spans of the parsed script include the locals prelude; report them
/// against the caller's source
fn shift_violation(violation: &Violation, offset: usize) -> Violation {
    let shift = |span: Span| {
        Span::new(
            span.start.saturating_sub(offset),
            span.end.saturating_sub(offset),
        )
    };
    match violation.clone() {
        Violation::DeniedDeclaration { kind, span } => Violation::DeniedDeclaration {
            kind,
            span: shift(span),
        },
        Violation::DeniedInvocation { name, span } => Violation::DeniedInvocation {
            name,
            span: shift(span),
        },
        Violation::UnlinkedSelfSend { name, span } => Violation::UnlinkedSelfSend {
            name,
            span: shift(span),
        },
    }
}

fn relocate_syntax_error(error: SyntaxError, offset: usize, source: &str) -> SyntaxError {
    if offset == 0 {
        return error;
    }
    let diagnostic = error.diagnostic;
    let span = Span::new(
        diagnostic.span.start.saturating_sub(offset).min(source.len()),
        diagnostic.span.end.saturating_sub(offset).min(source.len()),
    );
    SyntaxError {
        diagnostic: Diagnostic { span, ..diagnostic }.with_snippet_from(source),
    }
}
