//! Client-side private contact discovery.
//!
//! Resolves which phone numbers correspond to active accounts by querying a
//! remotely attested enclave over an encrypted channel, spending as little
//! lookup quota as possible via a persisted diff token. The
//! [`DiscoveryCoordinator`] is the sole public entry point for callers.

mod config;
mod coordinator;
mod engine;
mod error;
mod wire;

pub use config::{CacheConfig, DiscoveryConfig, EnclaveConfig, StateConfig};
pub use coordinator::{DiscoveryCoordinator, LookupDriver, LookupOutcome};
pub use engine::{
    AuthorizationProofSource, EnclaveLookupDriver, LookupOperation, CLOSE_INVALID_TOKEN,
    CLOSE_RATE_LIMITED,
};
pub use error::DiscoveryError;
pub use wire::{
    decode_triples, encode_aci_uak_pairs, encode_e164s, parse_retry_after, ClientRequest,
    ClientResponse, DEFAULT_RETRY_AFTER_SECS, TRIPLE_LEN,
};
