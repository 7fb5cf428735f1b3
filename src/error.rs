//! Compile errors
//!
//! A single `CompileError` sum type carries `{kind, span, message}` for every
//! failure this crate can report, from a malformed grammar rule table all
//! the way through a JIT back-end refusal. Each pass still has its own
//! narrow error enum internally (`ParseError`, `LowerError`, ...); they all
//! convert losslessly into `CompileError` via `From`, so callers only ever
//! handle one error type.
//!
//! No `thiserror`/`anyhow` here - manual `Display`/`Error`/`From` impls,
//! matching the teacher compiler's own `CodeGenError`.

use std::fmt;

/// A half-open byte range into the original source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Span {
        Span { start, end }
    }

    /// A span with no useful location (errors raised outside of any
    /// particular source range, e.g. "no `main` function").
    pub fn unknown() -> Span {
        Span { start: 0, end: 0 }
    }
}

/// The kind of a compile error, per the error taxonomy in the design.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    LexError,
    SyntaxError,
    UndeclaredIdentifier,
    Redeclaration,
    TypeMismatch,
    NotAnLvalue,
    BreakOutsideLoop,
    ContinueOutsideLoop,
    ReturnTypeMismatch,
    /// Parsed but rejected at lowering: `switch`, varargs, pointer
    /// arithmetic, unions, bitfields, and other explicit non-goals.
    UnsupportedConstruct,
    /// No snippet registered for an (operator, operand types) tuple.
    UnsupportedOperation,
    /// The JIT back-end rejected the assembled module.
    BackendError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::LexError => "lex error",
            ErrorKind::SyntaxError => "syntax error",
            ErrorKind::UndeclaredIdentifier => "undeclared identifier",
            ErrorKind::Redeclaration => "redeclaration",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::NotAnLvalue => "not an lvalue",
            ErrorKind::BreakOutsideLoop => "break outside loop",
            ErrorKind::ContinueOutsideLoop => "continue outside loop",
            ErrorKind::ReturnTypeMismatch => "return type mismatch",
            ErrorKind::UnsupportedConstruct => "unsupported construct",
            ErrorKind::UnsupportedOperation => "unsupported operation",
            ErrorKind::BackendError => "backend error",
        };
        write!(f, "{s}")
    }
}

/// A single compile error: what went wrong, where, and a human-readable
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub span: Span,
    pub message: String,
}

impl CompileError {
    pub fn new(kind: ErrorKind, span: Span, message: impl Into<String>) -> CompileError {
        CompileError {
            kind,
            span,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}..{}: {}",
            self.kind, self.span.start, self.span.end, self.message
        )
    }
}

impl std::error::Error for CompileError {}

impl From<std::fmt::Error> for CompileError {
    fn from(e: std::fmt::Error) -> Self {
        CompileError::new(
            ErrorKind::BackendError,
            Span::unknown(),
            format!("IR generation error: {e}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_span_and_message() {
        let e = CompileError::new(ErrorKind::UndeclaredIdentifier, Span::new(4, 7), "`foo`");
        assert_eq!(e.to_string(), "undeclared identifier at 4..7: `foo`");
    }
}
