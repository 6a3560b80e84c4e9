//! Error taxonomy for the request engine.
//!
//! # Design
//! Errors are discriminated by what the caller can do about them:
//! `Validation` is a caller bug and fails before any I/O, `Transport` is
//! retryable at the caller's discretion, `Status` carries the server's
//! verdict plus the descriptor's per-status message when one was declared,
//! and `Cancelled` must surface as "operation abandoned", never as a
//! generic failure. The engine never retries and never swallows an error;
//! every result settles with exactly one of these.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The descriptor was malformed: unresolved path token, body and form
    /// fields on the same call, or an invalid header/media type.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The network failed before any response was obtained.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server answered with a status outside the 2xx range.
    #[error("{message}")]
    Status {
        status: u16,
        body: String,
        message: String,
    },

    /// A 2xx body could not be decoded into the declared response shape.
    #[error("response decoding failed: {0}")]
    Decode(String),

    /// The result was cancelled by its owner before settling.
    #[error("request cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    /// The HTTP status code, when the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
