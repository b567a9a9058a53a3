//! Diagnostics produced while parsing and validating GraphQL documents.

use crate::span::Span;
use thiserror::Error;

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

/// A message attached to a source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

impl Label {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}

/// A single diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    /// Stable code from [`codes`].
    pub code: String,
    pub title: String,
    pub message: Option<String>,
    pub labels: Vec<Label>,
}

impl Diagnostic {
    pub fn error(code: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            code: code.into(),
            title: title.into(),
            message: None,
            labels: Vec::new(),
        }
    }

    pub fn warning(code: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            ..Self::error(code, title)
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_span(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label::new(span, message));
        self
    }

    #[must_use]
    pub fn primary_span(&self) -> Option<Span> {
        self.labels.first().map(|l| l.span)
    }

    /// One-line rendering: `E0001 unexpected token at 3:14: expected }, found <eof>`.
    #[must_use]
    pub fn describe(&self, source: &str) -> String {
        let mut out = format!("{} {}", self.code, self.title);
        if let Some(span) = self.primary_span() {
            let (line, col) = span.line_col(source);
            out.push_str(&format!(" at {line}:{col}"));
        }
        if let Some(message) = &self.message {
            out.push_str(": ");
            out.push_str(message);
        } else if let Some(label) = self.labels.first() {
            if label.message != self.title {
                out.push_str(": ");
                out.push_str(&label.message);
            }
        }
        out
    }

    /// Converts into a `miette` report carrying the named source for fancy output.
    #[must_use]
    pub fn to_report(&self, name: &str, source: &str) -> miette::Report {
        let severity = match self.severity {
            DiagnosticSeverity::Error => miette::Severity::Error,
            DiagnosticSeverity::Warning => miette::Severity::Warning,
        };
        let mut diagnostic = miette::MietteDiagnostic::new(self.title.clone())
            .with_code(self.code.clone())
            .with_severity(severity)
            .with_labels(self.labels.iter().map(|label| {
                miette::LabeledSpan::new_with_span(Some(label.message.clone()), label.span)
            }));
        if let Some(message) = &self.message {
            diagnostic = diagnostic.with_help(message.clone());
        }
        miette::Report::new(diagnostic)
            .with_source_code(miette::NamedSource::new(name, source.to_string()))
    }
}

/// A collection of diagnostics.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Adds an error diagnostic with a primary label.
    pub fn error(
        &mut self,
        code: impl Into<String>,
        title: impl Into<String>,
        span: Span,
        message: impl Into<String>,
    ) {
        self.add(Diagnostic::error(code, title).with_span(span, message));
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error)
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == DiagnosticSeverity::Error)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    /// Returns `Ok(())` when no errors were reported, otherwise the errors
    /// bundled with their source text.
    pub fn into_result(self, name: &str, text: &str) -> Result<(), SourceErrors> {
        if self.has_errors() {
            Err(SourceErrors {
                name: name.to_string(),
                text: text.to_string(),
                diagnostics: self.diagnostics,
            })
        } else {
            Ok(())
        }
    }
}

/// Errors reported against one named source document.
#[derive(Debug, Clone, Error)]
#[error("{name}: {}", summarize(.diagnostics, .text))]
pub struct SourceErrors {
    pub name: String,
    pub text: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl SourceErrors {
    /// Renders every diagnostic as a `miette` report.
    #[must_use]
    pub fn reports(&self) -> Vec<miette::Report> {
        self.diagnostics
            .iter()
            .map(|d| d.to_report(&self.name, &self.text))
            .collect()
    }
}

fn summarize(diagnostics: &[Diagnostic], text: &str) -> String {
    let mut errors = diagnostics
        .iter()
        .filter(|d| d.severity == DiagnosticSeverity::Error);
    match (errors.next(), errors.count()) {
        (Some(first), 0) => first.describe(text),
        (Some(first), rest) => format!("{} (and {rest} more)", first.describe(text)),
        (None, _) => "no errors".to_string(),
    }
}

/// Diagnostic codes.
pub mod codes {
    pub const UNEXPECTED_TOKEN: &str = "E0001";
    pub const UNEXPECTED_EOF: &str = "E0002";
    pub const INVALID_SYNTAX: &str = "E0003";
    pub const UNTERMINATED_STRING: &str = "E0004";
    pub const UNDEFINED_TYPE: &str = "E0010";
    pub const DUPLICATE_TYPE: &str = "E0012";
    pub const DUPLICATE_FIELD: &str = "E0013";
    pub const INVALID_DIRECTIVE: &str = "E0030";
    pub const UNKNOWN_FRAGMENT: &str = "E0040";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bag_into_result() {
        let mut bag = DiagnosticBag::new();
        assert!(bag.clone().into_result("schema.graphql", "").is_ok());

        bag.error(
            codes::UNEXPECTED_TOKEN,
            "unexpected token",
            Span::new(11, 12),
            "expected }, found <eof>",
        );
        assert_eq!(bag.error_count(), 1);

        let err = bag
            .into_result("schema.graphql", "type Query {")
            .unwrap_err();
        insta::assert_snapshot!(
            err.to_string(),
            @"schema.graphql: E0001 unexpected token at 1:12: expected }, found <eof>"
        );
    }

    #[test]
    fn test_warnings_are_not_errors() {
        let mut bag = DiagnosticBag::new();
        bag.add(Diagnostic::warning(codes::INVALID_DIRECTIVE, "unused directive"));
        assert!(!bag.has_errors());
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn test_report_keeps_code() {
        let diag = Diagnostic::error(codes::UNDEFINED_TYPE, "unknown type `Fruit`")
            .with_span(Span::new(0, 5), "not defined");
        let report = diag.to_report("schema.graphql", "Fruit");
        assert_eq!(report.code().map(|c| c.to_string()), Some("E0010".to_string()));
    }
}
