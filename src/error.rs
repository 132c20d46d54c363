use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// On-disk format violation: bad magic, unsupported version, CRC
    /// mismatch, malformed varint, offset out of range, ordering violation.
    /// Fatal for the affected file.
    #[error("format error in {file}: {reason}")]
    Format { file: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Lexer or parser violation. Carries the caret position into the
    /// original query and a remediation hint. Never fatal.
    #[error("query parse error at {position}: {message}")]
    QueryParse {
        message: String,
        position: usize,
        query: String,
        hint: String,
    },

    /// Caller violated an input contract (non-monotone docIds, negative
    /// term frequency, oversized query). Programmer error, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The manifest changed under a writer.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("document store error: {0}")]
    DocStore(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn format(file: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Format {
            file: file.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(
        message: impl Into<String>,
        position: usize,
        query: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        EngineError::QueryParse {
            message: message.into(),
            position,
            query: query.into(),
            hint: hint.into(),
        }
    }

    /// Check if this error indicates a transient failure that could be retried
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::ConcurrentModification(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::format("seg-3/dict", "magic mismatch");
        assert_eq!(
            err.to_string(),
            "format error in seg-3/dict: magic mismatch"
        );
    }

    #[test]
    fn test_retriable_errors() {
        assert!(EngineError::ConcurrentModification("manifest".into()).is_retriable());
        assert!(!EngineError::Validation("bad input".into()).is_retriable());
    }
}
