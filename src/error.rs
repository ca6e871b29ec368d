// error.rs - Run rejection errors
// Purpose: Structural problems that stop a run before any request is sent

use serde::Serialize;
use thiserror::Error;

/// Reasons a run request is rejected. Per-attempt failures never surface here;
/// they are reported as `error` results inside the event stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("'{0}' cannot be empty")]
    EmptyList(&'static str),

    #[error("Invalid URL in '{field}': {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("Unsupported form method: {0}")]
    UnsupportedMethod(String),

    #[error("Invalid proxy '{proxy}': {reason}")]
    InvalidProxy { proxy: String, reason: String },

    #[error("No attempts could be computed from the supplied lists")]
    NoAttempts,

    #[error("Malformed run request: {0}")]
    Malformed(String),
}

/// Wire shape of a rejection: a single JSON object, never a partial stream
#[derive(Debug, Serialize)]
pub struct RejectionBody {
    pub error: String,
}

impl From<&RunError> for RejectionBody {
    fn from(err: &RunError) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_body_message() {
        let err = RunError::EmptyList("identifier_list");
        let body = RejectionBody::from(&err);
        assert_eq!(body.error, "'identifier_list' cannot be empty");
    }
}
