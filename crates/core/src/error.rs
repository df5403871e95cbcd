// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for the greenhouse server.
//!
//! Every variant corresponds to one of the wire-level error codes in the
//! protocol (`error.code`); `code()` returns that string so the session
//! layer never has to re-derive it from the variant name.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GreenhouseError {
    /// Malformed input or a missing required field.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// Unknown nodeId or userId.
    #[error("not found: {0}")]
    NotFound(String),

    /// Reserved; not currently raised anywhere.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Unknown command target.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Non-admin attempting an admin-gated mutation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Anything unexpected, including I/O failures on the user store file.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GreenhouseError {
    /// The wire-level `error.code` string for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidArg(_) => "INVALID_ARG",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Internal(_) | Self::Io(_) => "INTERNAL",
        }
    }
}

pub type Result<T> = std::result::Result<T, GreenhouseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_wire_taxonomy() {
        assert_eq!(GreenhouseError::InvalidArg("x".into()).code(), "INVALID_ARG");
        assert_eq!(GreenhouseError::NotFound("node-9".into()).code(), "NOT_FOUND");
        assert_eq!(GreenhouseError::Forbidden("nope".into()).code(), "FORBIDDEN");
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no file");
        let err: GreenhouseError = io_err.into();
        assert_eq!(err.code(), "INTERNAL");
    }
}
