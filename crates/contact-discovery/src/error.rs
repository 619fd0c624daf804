//! The discovery error taxonomy.
//!
//! `LookupOperation` surfaces a fully classified error; the coordinator
//! intercepts rate limits to update shared deadlines and otherwise passes
//! errors through unchanged.

use chrono::{DateTime, Utc};
use discovery_state::StateError;
use enclave_channel::ChannelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Connectivity-level failure, passed through unchanged.
    #[error("network failure: {0}")]
    Network(#[source] ChannelError),

    /// The enclave rejected our quota token. Local diff state has been
    /// reset; retrying will establish a fresh token at extra quota cost.
    #[error("invalid quota token")]
    InvalidToken,

    /// Quota or connection rate limit. Retry no earlier than `retry_at`.
    #[error("rate limited until {retry_at}")]
    RateLimited { retry_at: DateTime<Utc> },

    #[error("unauthorized")]
    Unauthorized,

    #[error("client error: {0}")]
    Client(String),

    #[error("server error: {0}")]
    Server(String),

    /// The enclave violated the protocol. Not retryable; logged loudly at
    /// the point of detection.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl DiscoveryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DiscoveryError::Network(_)
            | DiscoveryError::InvalidToken
            | DiscoveryError::RateLimited { .. }
            | DiscoveryError::Server(_) => true,
            DiscoveryError::Unauthorized
            | DiscoveryError::Client(_)
            | DiscoveryError::MalformedResponse(_)
            | DiscoveryError::Unknown(_) => false,
        }
    }

    /// The earliest sensible retry time, if the service provided one.
    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        match self {
            DiscoveryError::RateLimited { retry_at } => Some(*retry_at),
            _ => None,
        }
    }
}

impl From<StateError> for DiscoveryError {
    fn from(err: StateError) -> Self {
        DiscoveryError::Unknown(format!("diff state: {err}"))
    }
}
