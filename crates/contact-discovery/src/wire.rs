//! Wire messages and byte codecs for one discovery round.
//!
//! Messages are JSON envelopes carried inside the encrypted session; byte
//! fields are base64 inside the envelope. Result triples are fixed-width
//! 40-byte records: 8-byte big-endian E164 digits, 16-byte PNI, 16-byte
//! ACI. An all-zero PNI marks a padding entry; an all-zero ACI means the
//! lookup was not proven.

use crate::error::DiscoveryError;
use chrono::Duration;
use discovery_types::{Aci, AciUakPair, DiscoveryResult, E164, Pni, SERVICE_ID_LEN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::error;

/// Record width of one e164/PNI/ACI triple.
pub const TRIPLE_LEN: usize = 8 + SERVICE_ID_LEN + SERVICE_ID_LEN;

/// Seconds to wait before retrying when a quota close carries no usable
/// retry-after payload.
pub const DEFAULT_RETRY_AFTER_SECS: i64 = 60;

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// A request frame. The initial request carries the diff fields; the
/// follow-up carries only `token_ack`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ClientRequest {
    #[serde(with = "base64_bytes", default)]
    pub token: Vec<u8>,
    /// Concatenated big-endian uint64 numbers already committed under the
    /// token.
    #[serde(with = "base64_bytes", default)]
    pub prev_e164s: Vec<u8>,
    /// Concatenated big-endian uint64 numbers new in this round.
    #[serde(with = "base64_bytes", default)]
    pub new_e164s: Vec<u8>,
    /// Concatenated 16-byte ACI + 16-byte access-key pairs.
    #[serde(with = "base64_bytes", default)]
    pub aci_uak_pairs: Vec<u8>,
    #[serde(default)]
    pub return_acis_without_uaks: bool,
    #[serde(default)]
    pub token_ack: bool,
}

/// A response frame. The first response carries the replacement token;
/// follow-up responses stream result triples.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ClientResponse {
    #[serde(with = "base64_bytes", default)]
    pub token: Vec<u8>,
    #[serde(with = "base64_bytes", default)]
    pub e164_pni_aci_triples: Vec<u8>,
}

/// Concatenate numbers as 8-byte big-endian records.
pub fn encode_e164s(e164s: &BTreeSet<E164>) -> Vec<u8> {
    let mut out = Vec::with_capacity(e164s.len() * 8);
    for e164 in e164s {
        out.extend_from_slice(&e164.to_be_bytes());
    }
    out
}

/// Concatenate authorization proofs as fixed-width identifier+key pairs.
pub fn encode_aci_uak_pairs(pairs: &[AciUakPair]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pairs.len() * 32);
    for pair in pairs {
        out.extend_from_slice(pair.aci.as_bytes());
        out.extend_from_slice(pair.access_key.expose());
    }
    out
}

/// Decode a buffer of result triples.
///
/// Padding entries (all-zero PNI) are skipped, not returned. Numbers absent
/// from every triple are implicitly "not discoverable".
pub fn decode_triples(data: &[u8]) -> Result<Vec<DiscoveryResult>, DiscoveryError> {
    if data.len() % TRIPLE_LEN != 0 {
        error!("Result payload is not a whole number of triples");
        return Err(DiscoveryError::MalformedResponse(format!(
            "result payload length {} not a multiple of {TRIPLE_LEN}",
            data.len()
        )));
    }

    let mut results = Vec::new();
    for record in data.chunks_exact(TRIPLE_LEN) {
        let raw_e164 = u64::from_be_bytes(record[0..8].try_into().expect("record width"));
        let pni = Pni::from_bytes(record[8..24].try_into().expect("record width"));
        let aci = Aci::from_bytes(record[24..40].try_into().expect("record width"));

        if pni.is_nil() {
            continue;
        }

        let e164 = E164::from_digits(raw_e164).map_err(|_| {
            error!("Result triple carries a malformed number");
            DiscoveryError::MalformedResponse(format!("malformed e164 digits {raw_e164}"))
        })?;

        results.push(DiscoveryResult {
            e164,
            pni,
            aci: (!aci.is_nil()).then_some(aci),
        });
    }
    Ok(results)
}

#[derive(Deserialize)]
struct QuotaExceededClose {
    /// Seconds; the service may send a fractional value.
    retry_after: f64,
}

/// Parse the retry-after duration from a quota close payload, falling back
/// to the protocol default when absent, negative, or unparseable.
pub fn parse_retry_after(close_reason: &[u8]) -> Duration {
    match serde_json::from_slice::<QuotaExceededClose>(close_reason) {
        Ok(body) if body.retry_after.is_finite() && body.retry_after >= 0.0 => {
            Duration::milliseconds((body.retry_after * 1000.0) as i64)
        }
        _ => Duration::seconds(DEFAULT_RETRY_AFTER_SECS),
    }
}
