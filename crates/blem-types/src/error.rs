//! Error types for value parsing in blem-types.

use thiserror::Error;

/// Errors that can occur when parsing identifiers and payloads.
///
/// This error type is platform-agnostic and does not include
/// transport errors (those belong in blem-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The string is not a 16-bit, 32-bit or 128-bit UUID.
    #[error("Invalid UUID '{0}'")]
    InvalidUuid(String),

    /// The string is not an even-length hexadecimal byte sequence.
    #[error("Invalid hex payload: {0}")]
    InvalidHex(String),
}

/// Result type alias using blem-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
