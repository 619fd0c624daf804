//! Remote-attestation verification against a pinned enclave measurement.

use crate::error::ChannelError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

/// Length of an enclave code measurement in bytes.
pub const MEASUREMENT_LEN: usize = 32;

/// The attestation evidence the enclave sends as its first frame.
#[derive(Debug, Deserialize)]
struct AttestationEvidence {
    /// Base64-encoded X25519 public key for the session.
    enclave_public_key: String,
    /// Hex-encoded code measurement of the running enclave.
    measurement: String,
    /// Unix timestamp (seconds) at which the evidence was produced.
    timestamp: i64,
}

/// The outcome of a successful verification.
#[derive(Debug)]
pub struct VerifiedAttestation {
    pub enclave_public_key: [u8; 32],
}

/// Validates attestation evidence against a pinned measurement and a
/// freshness bound.
#[derive(Clone)]
pub struct AttestationVerifier {
    mrenclave: [u8; MEASUREMENT_LEN],
    max_age: Duration,
}

impl AttestationVerifier {
    pub fn new(mrenclave: [u8; MEASUREMENT_LEN], max_age: std::time::Duration) -> Self {
        Self {
            mrenclave,
            max_age: Duration::from_std(max_age).unwrap_or_else(|_| Duration::hours(1)),
        }
    }

    /// Parse a hex-encoded pinned measurement.
    pub fn from_hex(
        mrenclave_hex: &str,
        max_age: std::time::Duration,
    ) -> Result<Self, ChannelError> {
        let bytes = hex::decode(mrenclave_hex)
            .map_err(|e| ChannelError::Attestation(format!("bad pinned measurement: {e}")))?;
        let mrenclave: [u8; MEASUREMENT_LEN] = bytes.try_into().map_err(|_| {
            ChannelError::Attestation("pinned measurement must be 32 bytes".into())
        })?;
        Ok(Self::new(mrenclave, max_age))
    }

    /// Verify an evidence frame, returning the enclave's session public key.
    pub fn verify(
        &self,
        evidence: &[u8],
        now: DateTime<Utc>,
    ) -> Result<VerifiedAttestation, ChannelError> {
        let evidence: AttestationEvidence = serde_json::from_slice(evidence)
            .map_err(|e| ChannelError::Attestation(format!("undecodable evidence: {e}")))?;

        let measurement = hex::decode(&evidence.measurement)
            .map_err(|e| ChannelError::Attestation(format!("undecodable measurement: {e}")))?;
        if measurement != self.mrenclave {
            return Err(ChannelError::Attestation(format!(
                "measurement mismatch: got {}",
                evidence.measurement
            )));
        }

        let issued_at = Utc
            .timestamp_opt(evidence.timestamp, 0)
            .single()
            .ok_or_else(|| ChannelError::Attestation("invalid evidence timestamp".into()))?;
        let age = now.signed_duration_since(issued_at);
        if age > self.max_age || age < -self.max_age {
            return Err(ChannelError::Attestation(format!(
                "stale evidence: issued at {issued_at}"
            )));
        }

        let key_bytes = STANDARD
            .decode(&evidence.enclave_public_key)
            .map_err(|e| ChannelError::Attestation(format!("undecodable public key: {e}")))?;
        let enclave_public_key: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| ChannelError::Attestation("public key must be 32 bytes".into()))?;

        debug!("Attestation verified against pinned measurement");
        Ok(VerifiedAttestation { enclave_public_key })
    }
}
