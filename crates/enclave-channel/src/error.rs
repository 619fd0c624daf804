//! Transport and secure-channel errors.

use std::time::Duration;
use thiserror::Error;

/// Connectivity-level failures from the transport itself. These are never
/// rewrapped by higher layers.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    /// The service rejected the connection before a socket was established.
    #[error("http {status} before socket upgrade")]
    Http {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed unexpectedly")]
    Disconnected,
}

/// Failures while attesting, handshaking, or exchanging on a channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("attestation rejected: {0}")]
    Attestation(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("session crypto failure: {0}")]
    Crypto(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The peer closed the channel with a non-normal close code.
    #[error("channel closed with code {code}")]
    Closed { code: u16, reason: Vec<u8> },

    #[error("channel is not established")]
    NotEstablished,
}
