//! Abstract duplex transport to the enclave service.
//!
//! The channel layer never touches sockets directly; callers inject a
//! connector for whatever plumbing carries frames (WebSocket in practice).

use crate::error::TransportError;
use async_trait::async_trait;

/// Close code for normal completion.
pub const CLOSE_NORMAL: u16 = 1000;

/// A close frame delivered by the peer or the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    /// Optional close payload; for quota closes this carries a JSON body.
    pub reason: Vec<u8>,
}

/// One inbound transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Vec<u8>),
    Close(CloseFrame),
}

/// A connected duplex byte transport.
#[async_trait]
pub trait EnclaveTransport: Send {
    /// Send one binary frame.
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Receive the next frame, blocking the awaiting task until one arrives.
    async fn receive(&mut self) -> Result<Frame, TransportError>;

    /// Close the transport. Must be idempotent.
    async fn close(&mut self);
}

/// Opens transports to the enclave service.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn EnclaveTransport>, TransportError>;
}
