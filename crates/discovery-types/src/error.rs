//! Validation errors for core discovery types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid E.164 phone number: {0}")]
    InvalidE164(String),

    #[error("access key must be {expected} bytes, got {actual}")]
    InvalidAccessKeyLength { expected: usize, actual: usize },
}
