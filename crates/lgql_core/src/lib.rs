//! Core utilities shared by the lgql crates.
//!
//! - `span`: byte ranges into SDL and query sources
//! - `text`: string interning for names seen by the lexer
//! - `diagnostics`: parser/validator diagnostics and their `miette` rendering

pub mod diagnostics;
pub mod span;
pub mod text;

pub use diagnostics::{Diagnostic, DiagnosticBag, DiagnosticSeverity, Label, SourceErrors};
pub use span::Span;
pub use text::{Interner, Text};
