//! Warden Runtime - policy-driven script sandbox
//!
//! This library provides:
//! - A lexer and parser for the script dialect
//! - The rewriter, which validates scripts against a [`Policy`] and
//!   instruments them with capability wrappers and resource guards
//! - The runtime side: [`Warden`] handles values, [`Proxy`] guards every call
//!   made through a wrapped value, and the guard counters are checked
//!   against the policy limits

/// Warden runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod ast;
pub mod audit;
pub mod diagnostic;
pub mod lexer;
pub mod method_dispatch;
pub mod parser;
pub mod policy;
pub mod proxy;
pub mod rewriter;
pub mod runtime;
pub mod span;
pub mod token;
pub mod value;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, MemoryAuditLogger, NullAuditLogger};
pub use diagnostic::{error_codes, sort_diagnostics, Diagnostic, DiagnosticLevel, DIAG_VERSION};
pub use lexer::Lexer;
pub use parser::{RubyParser, ScriptParser, SyntaxError};
pub use policy::{DeclarationKind, Policy, PolicyBuilder, PolicyError, RUNTIME_CONSTANT};
pub use proxy::{Proxy, UNWRAP_METHOD};
pub use rewriter::{
    rewrite, rewrite_logged, rewrite_with, validate, validate_diagnostics, RewriteError,
    RewriteLog, RewriteOptions, SelfLinker, SelfSendPrefixer, Violation,
};
pub use runtime::{HandleOptions, Warden};
pub use span::Span;
pub use token::{Token, TokenKind};
pub use value::{ClassRef, HostObject, RuntimeError, Value};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }
}
