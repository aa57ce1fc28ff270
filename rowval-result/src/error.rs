use std::io;
use thiserror::Error;

/// Unified error type for all rowval operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while pulling bytes from the underlying source.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow library error during columnar output construction.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Malformed literal or expression text.
    ///
    /// The only recoverable class: the streaming literal path catches it and
    /// escalates to full expression parsing. Raised from the last fallback it
    /// aborts the chunk.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Value cannot be stored in the target column type (illegal null,
    /// nested arity mismatch, incompatible value class).
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Numeric value does not fit the target type (decimal overflow, integer
    /// narrowing overflow). Deliberately distinct from [`Error::Syntax`] so it
    /// is never retried as an expression.
    #[error("numeric value out of range: {0}")]
    NumericRange(String),

    /// The operation requires a feature that is disabled or not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Bytes remained after the statement terminator.
    #[error("cannot read remaining data: {0}")]
    TruncatedInput(String),

    /// Internal error indicating a bug or unexpected state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for the failure classes that describe the input rather than the
    /// environment. These get the stream row index attached before they
    /// propagate to the caller.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Error::Syntax(_)
                | Error::TypeMismatch(_)
                | Error::NumericRange(_)
                | Error::TruncatedInput(_)
        )
    }

    /// Attach the stream-wide row index to a parse-class error. Other classes
    /// pass through untouched.
    pub fn at_row(self, row: u64) -> Self {
        if !self.is_parse_error() {
            return self;
        }
        match self {
            Error::Syntax(msg) => Error::Syntax(format!("{msg} (at row {row})")),
            Error::TypeMismatch(msg) => Error::TypeMismatch(format!("{msg} (at row {row})")),
            Error::NumericRange(msg) => Error::NumericRange(format!("{msg} (at row {row})")),
            Error::TruncatedInput(msg) => Error::TruncatedInput(format!("{msg} (at row {row})")),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_index_attaches_to_parse_errors() {
        let err = Error::Syntax("bad literal".into()).at_row(7);
        assert!(matches!(err, Error::Syntax(msg) if msg.contains("at row 7")));
    }

    #[test]
    fn row_index_skips_internal_errors() {
        let err = Error::Internal("broken invariant".into()).at_row(7);
        assert!(matches!(err, Error::Internal(msg) if !msg.contains("at row")));
    }
}
