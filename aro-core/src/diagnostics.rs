//! Compile-time diagnostics
//!
//! The lexer, parser, and semantic analyzer all report into one
//! [`Diagnostics`] collector. Compilation never aborts on the first
//! error; success means zero error-severity entries.

use crate::span::SourceSpan;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// A single severity-tagged message with a source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: SourceSpan,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{} at {}: {}", tag, self.span, self.message)
    }
}

/// Collector for compile-phase diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error.
    pub fn error(&mut self, message: impl Into<String>, span: SourceSpan) {
        self.entries.push(Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            span,
        });
    }

    /// Record a warning.
    pub fn warning(&mut self, message: impl Into<String>, span: SourceSpan) {
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            span,
        });
    }

    /// Absorb another collector's entries.
    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_without_aborting() {
        let mut diags = Diagnostics::new();
        diags.error("first", SourceSpan::default());
        diags.warning("second", SourceSpan::default());
        diags.error("third", SourceSpan::default());
        assert_eq!(diags.len(), 3);
        assert_eq!(diags.errors().count(), 2);
        assert_eq!(diags.warnings().count(), 1);
        assert!(diags.has_errors());
    }

    #[test]
    fn warnings_alone_are_not_failure() {
        let mut diags = Diagnostics::new();
        diags.warning("unused", SourceSpan::default());
        assert!(!diags.has_errors());
    }
}
