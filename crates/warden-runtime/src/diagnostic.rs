//! Diagnostics for script errors
//!
//! Lexer and parser failures, and rewrite violations reported by the CLI,
//! flow through the Diagnostic type so human and JSON output stay uniform.

use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic schema version
pub const DIAG_VERSION: u32 = 1;

/// Severity level of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::Error => write!(f, "error"),
        }
    }
}

/// A located error message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Diagnostic schema version
    pub diag_version: u32,
    /// Severity level
    pub level: DiagnosticLevel,
    /// Error code (e.g., "WD1001")
    pub code: String,
    /// Main diagnostic message
    pub message: String,
    /// File path
    pub file: String,
    /// Byte span in the script
    pub span: Span,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based, in chars)
    pub column: usize,
    /// Length of error span
    pub length: usize,
    /// Source line string
    pub snippet: String,
    /// Short label for caret range
    pub label: String,
}

impl Diagnostic {
    fn new(
        level: DiagnosticLevel,
        code: impl Into<String>,
        message: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            diag_version: DIAG_VERSION,
            level,
            code: code.into(),
            message: message.into(),
            file: "<script>".to_string(),
            span,
            line: 1,
            column: span.start + 1,
            length: span.len(),
            snippet: String::new(),
            label: String::new(),
        }
    }

    /// Create a new error diagnostic with code
    pub fn error_with_code(
        code: impl Into<String>,
        message: impl Into<String>,
        span: Span,
    ) -> Self {
        Self::new(DiagnosticLevel::Error, code, message, span)
    }

    /// Set the file path
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    /// Resolve line, column and snippet from the script the span points into
    pub fn with_snippet_from(mut self, source: &str) -> Self {
        let (line, column) = self.span.line_col(source);
        self.line = line;
        self.column = column;
        self.snippet = source.lines().nth(line - 1).unwrap_or_default().to_string();
        self
    }

    /// Set the label (caret description)
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// Sort diagnostics by location
pub fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by(|a, b| {
        a.file
            .cmp(&b.file)
            .then(a.line.cmp(&b.line))
            .then(a.column.cmp(&b.column))
    });
}

/// Error code registry
pub mod error_codes {
    // WD1xxx - Syntax Errors
    pub const LEX_ERROR: &str = "WD1000";
    pub const UNEXPECTED_TOKEN: &str = "WD1001";
    pub const UNEXPECTED_EOF: &str = "WD1002";
    pub const UNSUPPORTED_SYNTAX: &str = "WD1003";

    // WD2xxx - Policy Violations
    pub const DENIED_DECLARATION: &str = "WD2001";
    pub const DENIED_INVOCATION: &str = "WD2002";
    pub const UNLINKED_SELF_SEND: &str = "WD2003";

    // WD9xxx - Internal Errors
    pub const EDIT_CONFLICT: &str = "WD9001";
}
