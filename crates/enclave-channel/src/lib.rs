//! Attested secure channel to a contact-discovery enclave.
//!
//! Performs remote attestation against a pinned code measurement over an
//! abstract duplex transport, then exposes an end-to-end encrypted
//! request/response channel. The transport never sees plaintext.

mod attestation;
mod channel;
mod error;
mod session;
mod transport;

pub use attestation::{AttestationVerifier, VerifiedAttestation, MEASUREMENT_LEN};
pub use channel::{
    AttestedChannelFactory, ChannelState, ClientHello, DiscoveryChannel, SecureChannel,
    SecureChannelFactory, HANDSHAKE_COMPLETE, HANDSHAKE_REQUEST,
};
pub use error::{ChannelError, TransportError};
pub use session::{Role, SessionCrypto};
pub use transport::{CloseFrame, EnclaveTransport, Frame, TransportConnector, CLOSE_NORMAL};
