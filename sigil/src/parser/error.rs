use std::fmt;
use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label};

/// Parse errors with source location information.
///
/// Errors carry the file name and 1-based line directly (included files are
/// parsed outside any file database), plus a byte span for terminal
/// diagnostics when the caller has one.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub file: String,
    pub line: usize,
    pub span: Range<usize>,
    pub notes: Vec<String>,
}

impl ParseError {
    pub fn new(
        message: impl Into<String>,
        file: impl Into<String>,
        line: usize,
        span: Range<usize>,
    ) -> Self {
        ParseError {
            message: message.into(),
            file: file.into(),
            line,
            span,
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Convert to a codespan-reporting Diagnostic for display.
    pub fn to_diagnostic(&self, file_id: usize) -> Diagnostic<usize> {
        Diagnostic::error()
            .with_message(&self.message)
            .with_labels(vec![Label::primary(file_id, self.span.clone())])
            .with_notes(self.notes.clone())
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.message, self.file, self.line)
    }
}

impl std::error::Error for ParseError {}
