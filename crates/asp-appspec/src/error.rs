//! Structured generator errors carrying a source location.

use std::fmt;

use crate::lexer::SourceLocation;

/// An error produced while lexing, parsing, or emitting a specification.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct GeneratorError {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl GeneratorError {
    pub(crate) fn new(file: &str, location: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            file: file.to_string(),
            line: location.line,
            column: location.column,
            message: message.into(),
        }
    }

    /// An error with no single source position, e.g. a cross-definition
    /// validation failure.
    pub(crate) fn global(file: &str, message: impl Into<String>) -> Self {
        Self {
            file: file.to_string(),
            line: 0,
            column: 0,
            message: message.into(),
        }
    }
}

impl fmt::Display for GeneratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}: {}", self.file, self.message)
        } else {
            write!(f, "{}:{}:{}: {}", self.file, self.line, self.column, self.message)
        }
    }
}

impl std::error::Error for GeneratorError {}
