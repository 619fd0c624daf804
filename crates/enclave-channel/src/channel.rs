//! The attested secure channel and its lifecycle state machine.

use crate::attestation::AttestationVerifier;
use crate::error::ChannelError;
use crate::session::{Role, SessionCrypto};
use crate::transport::{CloseFrame, EnclaveTransport, Frame, TransportConnector, CLOSE_NORMAL};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use x25519_dalek::{EphemeralSecret, PublicKey};

/// Plaintext the client proves key agreement with.
pub const HANDSHAKE_REQUEST: &[u8] = b"cds-handshake-request";
/// Plaintext the enclave confirms the session with.
pub const HANDSHAKE_COMPLETE: &[u8] = b"cds-handshake-complete";

/// The client's handshake payload, sent after attestation is verified.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientHello {
    /// Base64-encoded X25519 public key for the session.
    pub client_public_key: String,
    /// Base64-encoded session ciphertext of [`HANDSHAKE_REQUEST`].
    pub confirmation: String,
}

/// Channel lifecycle, starting from a transport the connector has already
/// opened. Transitions are one-directional; `Finished` is terminal and
/// reachable from any state on error or explicit disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connected,
    Handshaking,
    Established,
    Finished,
}

/// An established encrypted channel to the enclave.
#[async_trait]
pub trait DiscoveryChannel: Send {
    /// Send one request and read exactly one response.
    async fn send_and_receive_one(&mut self, request: Vec<u8>) -> Result<Vec<u8>, ChannelError>;

    /// Send one request and read responses until the enclave closes the
    /// channel normally.
    async fn send_and_receive_all(
        &mut self,
        request: Vec<u8>,
    ) -> Result<Vec<Vec<u8>>, ChannelError>;

    /// Tear the channel down. Idempotent.
    async fn disconnect(&mut self);
}

/// Connects a transport and performs attestation plus handshake.
#[async_trait]
pub trait SecureChannelFactory: Send + Sync {
    async fn connect_and_attest(&self) -> Result<Box<dyn DiscoveryChannel>, ChannelError>;
}

/// A duplex channel whose payloads are end-to-end encrypted with a session
/// negotiated against attested enclave key material. The transport never
/// sees plaintext.
pub struct SecureChannel {
    transport: Box<dyn EnclaveTransport>,
    crypto: Option<SessionCrypto>,
    state: ChannelState,
}

impl SecureChannel {
    /// Run attestation and the handshake over a freshly connected transport.
    ///
    /// On any failure the transport is closed before the error surfaces, so
    /// a partially-established channel can never be reused.
    #[instrument(skip_all)]
    pub async fn establish(
        transport: Box<dyn EnclaveTransport>,
        verifier: &AttestationVerifier,
    ) -> Result<Self, ChannelError> {
        let mut channel = Self {
            transport,
            crypto: None,
            state: ChannelState::Connected,
        };
        match channel.run_handshake(verifier).await {
            Ok(()) => {
                channel.state = ChannelState::Established;
                debug!("Secure channel established");
                Ok(channel)
            }
            Err(e) => {
                warn!("Handshake failed: {}", e);
                channel.finish().await;
                Err(e)
            }
        }
    }

    /// Lifecycle state, for observability.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    async fn run_handshake(&mut self, verifier: &AttestationVerifier) -> Result<(), ChannelError> {
        let evidence = self.receive_data().await?;
        let attested = verifier.verify(&evidence, Utc::now())?;
        self.state = ChannelState::Handshaking;

        let client_secret = EphemeralSecret::random_from_rng(OsRng);
        let client_public = PublicKey::from(&client_secret);
        let enclave_public = PublicKey::from(attested.enclave_public_key);
        let shared_secret = client_secret.diffie_hellman(&enclave_public);

        let mut crypto = SessionCrypto::derive(
            shared_secret.as_bytes(),
            client_public.as_bytes(),
            &attested.enclave_public_key,
            Role::Client,
        )?;

        let hello = ClientHello {
            client_public_key: STANDARD.encode(client_public.as_bytes()),
            confirmation: STANDARD.encode(crypto.encrypt(HANDSHAKE_REQUEST)?),
        };
        let hello_bytes = serde_json::to_vec(&hello)
            .map_err(|e| ChannelError::Handshake(format!("hello encoding: {e}")))?;
        self.transport.send(hello_bytes).await?;

        let completion = self.receive_data().await?;
        if crypto.decrypt(&completion)? != HANDSHAKE_COMPLETE {
            return Err(ChannelError::Handshake(
                "unexpected handshake completion payload".into(),
            ));
        }

        self.crypto = Some(crypto);
        Ok(())
    }

    async fn receive_data(&mut self) -> Result<Vec<u8>, ChannelError> {
        match self.transport.receive().await? {
            Frame::Data(data) => Ok(data),
            Frame::Close(CloseFrame { code, reason }) => {
                Err(ChannelError::Closed { code, reason })
            }
        }
    }

    async fn exchange_one(&mut self, request: Vec<u8>) -> Result<Vec<u8>, ChannelError> {
        let crypto = self.crypto.as_mut().ok_or(ChannelError::NotEstablished)?;
        let ciphertext = crypto.encrypt(&request)?;
        self.transport.send(ciphertext).await?;

        let response = self.receive_data().await?;
        let crypto = self.crypto.as_mut().ok_or(ChannelError::NotEstablished)?;
        crypto.decrypt(&response)
    }

    async fn exchange_all(&mut self, request: Vec<u8>) -> Result<Vec<Vec<u8>>, ChannelError> {
        let crypto = self.crypto.as_mut().ok_or(ChannelError::NotEstablished)?;
        let ciphertext = crypto.encrypt(&request)?;
        self.transport.send(ciphertext).await?;

        let mut responses = Vec::new();
        loop {
            match self.transport.receive().await? {
                Frame::Data(data) => {
                    let crypto = self.crypto.as_mut().ok_or(ChannelError::NotEstablished)?;
                    responses.push(crypto.decrypt(&data)?);
                }
                Frame::Close(CloseFrame {
                    code: CLOSE_NORMAL, ..
                }) => return Ok(responses),
                Frame::Close(CloseFrame { code, reason }) => {
                    return Err(ChannelError::Closed { code, reason })
                }
            }
        }
    }

    async fn finish(&mut self) {
        if self.state != ChannelState::Finished {
            self.transport.close().await;
            self.state = ChannelState::Finished;
        }
    }

    fn require_established(&self) -> Result<(), ChannelError> {
        if self.state == ChannelState::Established {
            Ok(())
        } else {
            Err(ChannelError::NotEstablished)
        }
    }
}

#[async_trait]
impl DiscoveryChannel for SecureChannel {
    async fn send_and_receive_one(&mut self, request: Vec<u8>) -> Result<Vec<u8>, ChannelError> {
        self.require_established()?;
        let result = self.exchange_one(request).await;
        if result.is_err() {
            self.finish().await;
        }
        result
    }

    async fn send_and_receive_all(
        &mut self,
        request: Vec<u8>,
    ) -> Result<Vec<Vec<u8>>, ChannelError> {
        self.require_established()?;
        let result = self.exchange_all(request).await;
        // The enclave closes the channel in the happy path; either way the
        // transport is done after a read-all exchange.
        self.finish().await;
        result
    }

    async fn disconnect(&mut self) {
        self.finish().await;
    }
}

/// Production [`SecureChannelFactory`]: opens a transport via the injected
/// connector and attests it against the pinned measurement.
pub struct AttestedChannelFactory {
    connector: Arc<dyn TransportConnector>,
    verifier: AttestationVerifier,
}

impl AttestedChannelFactory {
    pub fn new(connector: Arc<dyn TransportConnector>, verifier: AttestationVerifier) -> Self {
        Self {
            connector,
            verifier,
        }
    }
}

#[async_trait]
impl SecureChannelFactory for AttestedChannelFactory {
    async fn connect_and_attest(&self) -> Result<Box<dyn DiscoveryChannel>, ChannelError> {
        let transport = self.connector.connect().await?;
        let channel = SecureChannel::establish(transport, &self.verifier).await?;
        Ok(Box::new(channel))
    }
}
