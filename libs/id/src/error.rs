//! Error types for identifier parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The identifier string is empty.
    #[error("identifier cannot be empty")]
    Empty,

    /// The identifier contains a character that is not allowed.
    #[error("identifier contains invalid character at byte {position}")]
    InvalidCharacter { position: usize },

    /// The IP address is not a valid dotted-quad.
    #[error("invalid IPv4 address: {0}")]
    InvalidIpAddress(String),
}
