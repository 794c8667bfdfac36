//! Error types for crumb-core
//!
//! Malformed tokens and schema mismatches are routine while a dispatcher
//! probes a token against several handlers. The remaining variants are real
//! failures that must reach the caller.

use thiserror::Error;

/// Top-level error type for encoding and decoding callback tokens
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("Malformed token: {0}")]
    Malformed(#[from] MalformedToken),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(#[from] SchemaMismatch),

    #[error("Unresolvable reference: {0}")]
    UnresolvableReference(String),

    #[error("Encoding too large: {len} bytes exceeds budget of {budget}")]
    EncodingTooLarge { len: usize, budget: usize },

    #[error("Not compactable: {0}")]
    NotCompactable(String),

    #[error("Value cannot be represented: {0}")]
    Unrepresentable(String),

    #[error("Compaction store failure: {0}")]
    Store(String),
}

/// Structural problems with a token string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedToken {
    #[error("expected '{{' at byte {at}")]
    MissingBlock { at: usize },

    #[error("unbalanced block starting at byte {at}")]
    UnbalancedBlock { at: usize },

    #[error("unterminated quote starting at byte {at}")]
    UnterminatedQuote { at: usize },

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("bad literal at byte {at}: {reason}")]
    Literal { at: usize, reason: String },

    #[error("bad reference '{0}'")]
    BadReference(String),

    #[error("expected full marker at byte {at}")]
    MissingMarker { at: usize },

    #[error("token matches no known shape")]
    UnknownShape,
}

/// Decoded data that does not fit the expected schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaMismatch {
    #[error("expected identifier '{expected}', found '{found}'")]
    Identifier { expected: String, found: String },

    #[error("no schema registered for '{0}'")]
    UnknownIdentifier(String),

    #[error("missing field '{0}'")]
    MissingField(String),

    #[error("argument '{0}' is not declared")]
    UndeclaredField(String),

    #[error("extra '{0}' shadows a declared field")]
    ShadowedField(String),

    #[error("expected {expected} positional values, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field '{field}' is not a valid {expected}")]
    FieldType { field: String, expected: String },

    #[error("schema version {expected} expected, found {found:?}")]
    Version { expected: u32, found: Option<u32> },
}

impl CodecError {
    /// True for outcomes that mean "not mine, try the next handler"
    pub fn is_routine(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::SchemaMismatch(_))
    }

    /// Create a new UnresolvableReference error
    pub fn unresolvable(reference: impl Into<String>) -> Self {
        Self::UnresolvableReference(reference.into())
    }

    /// Create a new NotCompactable error
    pub fn not_compactable(reason: impl Into<String>) -> Self {
        Self::NotCompactable(reason.into())
    }

    /// Create a new Store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}

impl MalformedToken {
    pub(crate) fn literal(at: usize, reason: impl Into<String>) -> Self {
        Self::Literal {
            at,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routine_classification() {
        assert!(CodecError::from(MalformedToken::UnknownShape).is_routine());
        assert!(CodecError::from(SchemaMismatch::MissingField("page".into())).is_routine());
        assert!(!CodecError::unresolvable("abc").is_routine());
        assert!(!CodecError::EncodingTooLarge { len: 70, budget: 64 }.is_routine());
        assert!(!CodecError::store("disk full").is_routine());
    }

    #[test]
    fn test_error_messages() {
        let err = CodecError::from(SchemaMismatch::FieldCount {
            expected: 2,
            found: 3,
        });
        assert!(err.to_string().contains("expected 2 positional values"));

        let err = CodecError::from(MalformedToken::MissingBlock { at: 1 });
        assert!(err.to_string().contains("'{'"));
    }
}
