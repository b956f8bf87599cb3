//! Identifier parse errors.

use thiserror::Error;

/// Why a string is not a valid identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier is blank")]
    Blank,

    /// A local id whose prefix names a different resource, or no prefix at all.
    #[error("expected a '{expected}_' identifier, got '{found}'")]
    WrongKind {
        expected: &'static str,
        found: String,
    },

    /// The part after the prefix is not a ULID.
    #[error("malformed identifier body: {0}")]
    Malformed(String),
}
