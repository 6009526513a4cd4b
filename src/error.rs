//! The crate's single error type.
//!
//! Every fallible public function returns `Result<T, PhantomError>`: a
//! `thiserror` derive with one `#[error("...")]` message per variant, and
//! `#[from]` only where the source conversion is unambiguous.

use thiserror::Error;

/// The single error type returned by every fallible operation in this crate.
#[derive(Debug, Error)]
pub enum PhantomError {
    #[error("unknown moment '{id}'")]
    UnknownMoment { id: String },

    #[error("unknown take {id}")]
    UnknownTake { id: i64 },

    #[error("unknown character '{id}'")]
    UnknownCharacter { id: String },

    #[error("unknown fact {id}")]
    UnknownFact { id: i64 },

    #[error("duplicate id '{id}'")]
    DuplicateId { id: String },

    #[error("duplicate moment sequence {sequence}")]
    DuplicateSequence { sequence: i64 },

    #[error("invalid value '{value}' for field '{field}'")]
    InvalidEnum { field: &'static str, value: String },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding backend unavailable: {message}")]
    EmbeddingUnavailable { message: String },

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("corrupt record in {table}.{column} (row {row_id}): {message}")]
    CorruptRecord {
        table: &'static str,
        column: &'static str,
        row_id: String,
        message: String,
    },
}

impl PhantomError {
    /// The stable taxonomy tag used by wire adapters for a `{ kind, message }`
    /// error shape.
    pub fn kind(&self) -> &'static str {
        match self {
            PhantomError::UnknownMoment { .. } => "UnknownMoment",
            PhantomError::UnknownTake { .. } => "UnknownTake",
            PhantomError::UnknownCharacter { .. } => "UnknownCharacter",
            PhantomError::UnknownFact { .. } => "UnknownFact",
            PhantomError::DuplicateId { .. } => "DuplicateId",
            PhantomError::DuplicateSequence { .. } => "DuplicateSequence",
            PhantomError::InvalidEnum { .. } => "InvalidEnum",
            PhantomError::DimensionMismatch { .. } => "DimensionMismatch",
            PhantomError::EmbeddingUnavailable { .. } => "EmbeddingUnavailable",
            PhantomError::StorageError(_) => "StorageError",
            PhantomError::CorruptRecord { .. } => "CorruptRecord",
        }
    }
}

impl From<tokio_rusqlite::Error> for PhantomError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        PhantomError::StorageError(err.to_string())
    }
}

impl From<std::io::Error> for PhantomError {
    fn from(err: std::io::Error) -> Self {
        PhantomError::StorageError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_and_distinct() {
        let errs = [
            PhantomError::UnknownMoment { id: "m1".into() },
            PhantomError::UnknownTake { id: 1 },
            PhantomError::DuplicateId { id: "a".into() },
            PhantomError::DimensionMismatch {
                expected: 384,
                actual: 1536,
            },
        ];
        let kinds: Vec<_> = errs.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "UnknownMoment",
                "UnknownTake",
                "DuplicateId",
                "DimensionMismatch"
            ]
        );
    }

    #[test]
    fn display_includes_offending_value() {
        let err = PhantomError::DuplicateSequence { sequence: 7 };
        assert!(err.to_string().contains('7'));
    }
}
