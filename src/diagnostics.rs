use std::fmt;

use thiserror::Error;

/// A byte span within a fragment, plus the 1-based line it starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
    pub line: usize,
}

impl SourceSpan {
    pub const fn new(start: usize, end: usize, line: usize) -> Self {
        Self { start, end, line }
    }

    pub fn to(self, other: SourceSpan) -> Self {
        Self {
            start: self.start,
            end: other.end.max(self.end),
            line: self.line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexer,
    Parser,
    Compile,
    Runtime,
    Scope,
}

impl DiagnosticKind {
    /// Raised before execution started; the span is authoritative.
    pub fn is_syntax(self) -> bool {
        matches!(self, Self::Lexer | Self::Parser | Self::Compile)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub unit: String,
    pub line: usize,
    pub function: Option<String>,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, line {}", self.unit, self.line)?;
        if let Some(function) = &self.function {
            write!(f, ", in {function}")?;
        }
        Ok(())
    }
}

/// Rich diagnostic information surfaced to end users.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Option<SourceSpan>,
    /// Failing line within the fragment, once known.
    pub line: Option<usize>,
    /// Synthetic unit the failure belongs to, once known.
    pub unit: Option<String>,
    /// Innermost first.
    pub trace: Vec<TraceFrame>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            line: None,
            unit: None,
            trace: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Runtime, message)
    }

    pub fn undefined(name: &str) -> Self {
        Self::new(DiagnosticKind::Scope, format!("undefined variable `{name}`"))
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_frame(mut self, frame: TraceFrame) -> Self {
        self.trace.push(frame);
        self
    }

    pub fn is_syntax(&self) -> bool {
        self.kind.is_syntax()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        match (&self.unit, self.line, self.span) {
            (Some(unit), Some(line), _) => write!(f, " ({unit}, line {line})")?,
            (None, Some(line), _) => write!(f, " (line {line})")?,
            (_, None, Some(span)) => write!(f, " (line {})", span.line)?,
            _ => {}
        }
        for note in &self.notes {
            let mut lines = note.lines();
            if let Some(first) = lines.next() {
                write!(f, "\n  note: {first}")?;
            }
            for line in lines {
                write!(f, "\n  {line}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Unified error type for the evaluator and its tooling.
#[derive(Debug, Error)]
pub enum NevalError {
    #[error("{0}")]
    Diagnostic(#[from] Diagnostic),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NevalError {
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::Diagnostic(diag) => Some(diag),
            Self::Io(_) => None,
        }
    }

    /// Attaches `span` unless the error already points somewhere.
    pub fn or_span(self, span: SourceSpan) -> Self {
        match self {
            Self::Diagnostic(mut diag) => {
                if diag.span.is_none() && diag.trace.is_empty() {
                    diag.span = Some(span);
                }
                Self::Diagnostic(diag)
            }
            other => other,
        }
    }

    pub(crate) fn map_diagnostic(self, f: impl FnOnce(Diagnostic) -> Diagnostic) -> Self {
        match self {
            Self::Diagnostic(diag) => Self::Diagnostic(f(diag)),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, NevalError>;
