//! Error types for the candidate dialect: syntax errors from the lexer and
//! parser, and typed runtime exceptions raised while interpreting.

use std::fmt;

/// A syntax error with the one-based line it was detected on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Result type for lexing and parsing.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Exception classes the interpreter can raise.
///
/// Candidate code cannot catch these (`try` is forbidden), so every raise
/// terminates the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcKind {
    TypeError,
    ValueError,
    ZeroDivisionError,
    NameError,
    IndexError,
    KeyError,
    AttributeError,
    RecursionError,
    OverflowError,
    MemoryError,
    AssertionError,
    SyntaxError,
}

impl fmt::Display for ExcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExcKind::TypeError => "TypeError",
            ExcKind::ValueError => "ValueError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
            ExcKind::NameError => "NameError",
            ExcKind::IndexError => "IndexError",
            ExcKind::KeyError => "KeyError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::RecursionError => "RecursionError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::MemoryError => "MemoryError",
            ExcKind::AssertionError => "AssertionError",
            ExcKind::SyntaxError => "SyntaxError",
        };
        f.write_str(name)
    }
}

/// A runtime exception raised by candidate code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RuntimeError {
    pub kind: ExcKind,
    pub message: String,
    /// Line of the statement being executed when the error surfaced.
    pub line: Option<usize>,
}

impl RuntimeError {
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::ValueError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ExcKind::ZeroDivisionError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::IndexError, message)
    }

    pub fn overflow() -> Self {
        Self::new(ExcKind::OverflowError, "integer result out of 64-bit range")
    }

    /// Attach a line number unless one is already recorded (innermost wins).
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    pub fn is_type_error(&self) -> bool {
        self.kind == ExcKind::TypeError
    }
}

/// Result type for interpretation.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_includes_line() {
        let err = ParseError::new(3, "invalid syntax");
        assert_eq!(err.to_string(), "line 3: invalid syntax");
    }

    #[test]
    fn test_runtime_error_display_includes_kind() {
        let err = RuntimeError::zero_division("division by zero");
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn test_innermost_line_wins() {
        let err = RuntimeError::type_error("bad").at_line(7).at_line(2);
        assert_eq!(err.line, Some(7));
    }
}
