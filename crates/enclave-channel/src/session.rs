//! Session crypto for an attested channel.
//!
//! Keys come from an X25519 exchange with the attested enclave key,
//! expanded through HKDF-SHA256 into one AES-256-GCM key per direction.
//! Nonces are per-direction send counters, so both sides must process
//! frames in order.

use crate::error::ChannelError;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

const CLIENT_TO_ENCLAVE_INFO: &[u8] = b"cds-client-to-enclave";
const ENCLAVE_TO_CLIENT_INFO: &[u8] = b"cds-enclave-to-client";

/// Which end of the exchange this session instance encrypts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Enclave,
}

/// An established encrypt/decrypt session.
pub struct SessionCrypto {
    send_cipher: Aes256Gcm,
    recv_cipher: Aes256Gcm,
    send_counter: u64,
    recv_counter: u64,
}

impl SessionCrypto {
    /// Derive both directional keys from the raw DH output.
    ///
    /// The salt binds the keys to the exact key pair used in the handshake.
    pub fn derive(
        shared_secret: &[u8; 32],
        client_public_key: &[u8; 32],
        enclave_public_key: &[u8; 32],
        role: Role,
    ) -> Result<Self, ChannelError> {
        let mut salt = Vec::with_capacity(64);
        salt.extend_from_slice(client_public_key);
        salt.extend_from_slice(enclave_public_key);

        let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
        let mut client_to_enclave = [0u8; KEY_LEN];
        hkdf.expand(CLIENT_TO_ENCLAVE_INFO, &mut client_to_enclave)
            .map_err(|_| ChannelError::Crypto("HKDF expansion failed".into()))?;
        let mut enclave_to_client = [0u8; KEY_LEN];
        hkdf.expand(ENCLAVE_TO_CLIENT_INFO, &mut enclave_to_client)
            .map_err(|_| ChannelError::Crypto("HKDF expansion failed".into()))?;

        let (send_key, recv_key) = match role {
            Role::Client => (client_to_enclave, enclave_to_client),
            Role::Enclave => (enclave_to_client, client_to_enclave),
        };

        Ok(Self {
            send_cipher: Aes256Gcm::new_from_slice(&send_key)
                .map_err(|_| ChannelError::Crypto("bad send key length".into()))?,
            recv_cipher: Aes256Gcm::new_from_slice(&recv_key)
                .map_err(|_| ChannelError::Crypto("bad recv key length".into()))?,
            send_counter: 0,
            recv_counter: 0,
        })
    }

    fn nonce(counter: u64) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        nonce[4..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }

    /// Encrypt the next outbound frame.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let nonce = Self::nonce(self.send_counter);
        let ciphertext = self
            .send_cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| ChannelError::Crypto("encryption failed".into()))?;
        self.send_counter += 1;
        Ok(ciphertext)
    }

    /// Decrypt the next inbound frame.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let nonce = Self::nonce(self.recv_counter);
        let plaintext = self
            .recv_cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| ChannelError::Crypto("decryption failed".into()))?;
        self.recv_counter += 1;
        Ok(plaintext)
    }
}
