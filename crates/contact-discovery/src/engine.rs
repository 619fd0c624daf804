//! One discovery round: build the diff request, drive the attested channel
//! through the token exchange, persist the replacement token, and decode
//! the streamed results.

use crate::coordinator::{LookupDriver, LookupOutcome};
use crate::error::DiscoveryError;
use crate::wire::{
    decode_triples, encode_aci_uak_pairs, encode_e164s, parse_retry_after, ClientRequest,
    ClientResponse,
};
use async_trait::async_trait;
use chrono::Utc;
use discovery_state::DiffStateStore;
use discovery_types::{AciUakPair, DiscoveryMode, DiscoveryResult, E164};
use enclave_channel::{ChannelError, DiscoveryChannel, SecureChannelFactory, TransportError};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Close code for an exhausted quota.
pub const CLOSE_RATE_LIMITED: u16 = 4008;
/// Close code for a rejected quota token.
pub const CLOSE_INVALID_TOKEN: u16 = 4101;

/// Supplies per-account authorization-proof pairs for the current user.
pub trait AuthorizationProofSource: Send + Sync {
    fn aci_uak_pairs(&self) -> Vec<AciUakPair>;
}

/// A single discovery round for a set of numbers.
pub struct LookupOperation {
    e164s_to_lookup: BTreeSet<E164>,
    /// `None` for one-off/stateless callers: the request always consumes
    /// quota and never reads or writes the persisted token.
    persistent_state: Option<DiffStateStore>,
    auth_source: Arc<dyn AuthorizationProofSource>,
    channel_factory: Arc<dyn SecureChannelFactory>,
}

impl LookupOperation {
    pub fn new(
        e164s_to_lookup: BTreeSet<E164>,
        persistent_state: Option<DiffStateStore>,
        auth_source: Arc<dyn AuthorizationProofSource>,
        channel_factory: Arc<dyn SecureChannelFactory>,
    ) -> Self {
        debug_assert!(!e164s_to_lookup.is_empty());
        Self {
            e164s_to_lookup,
            persistent_state,
            auth_source,
            channel_factory,
        }
    }

    /// Perform the round, returning classified errors per the discovery
    /// taxonomy.
    #[instrument(skip(self), fields(count = self.e164s_to_lookup.len()))]
    pub async fn perform(&self) -> Result<Vec<DiscoveryResult>, DiscoveryError> {
        let mut channel = self
            .channel_factory
            .connect_and_attest()
            .await
            .map_err(|e| self.classify(e))?;

        let outcome = self.run(channel.as_mut()).await;
        if outcome.is_err() {
            // The enclave closes the channel in the happy path; on a
            // locally detected failure we must tear it down ourselves.
            channel.disconnect().await;
        }
        if let Err(e) = &outcome {
            warn!("Discovery round failed: {}", e);
        }
        outcome
    }

    async fn run(
        &self,
        channel: &mut dyn DiscoveryChannel,
    ) -> Result<Vec<DiscoveryResult>, DiscoveryError> {
        let prior = match &self.persistent_state {
            Some(state) => state.load()?,
            None => None,
        };

        let had_token = prior.is_some();
        let (prev_token, prev_e164s, new_e164s) = match prior {
            Some(state) => {
                let new: BTreeSet<E164> = self
                    .e164s_to_lookup
                    .difference(&state.known_e164s)
                    .copied()
                    .collect();
                (state.token, state.known_e164s, new)
            }
            None => (Vec::new(), BTreeSet::new(), self.e164s_to_lookup.clone()),
        };

        debug!(
            "Requesting {} new of {} total numbers",
            new_e164s.len(),
            self.e164s_to_lookup.len()
        );

        let request = ClientRequest {
            token: prev_token,
            prev_e164s: encode_e164s(&prev_e164s),
            new_e164s: encode_e164s(&new_e164s),
            aci_uak_pairs: encode_aci_uak_pairs(&self.auth_source.aci_uak_pairs()),
            return_acis_without_uaks: true,
            token_ack: false,
        };
        let request_bytes = serde_json::to_vec(&request)
            .map_err(|e| DiscoveryError::Unknown(format!("request encoding: {e}")))?;

        let first = channel
            .send_and_receive_one(request_bytes)
            .await
            .map_err(|e| self.classify(e))?;
        let token_response: ClientResponse = serde_json::from_slice(&first)
            .map_err(|e| DiscoveryError::MalformedResponse(format!("token response: {e}")))?;

        if token_response.token.is_empty() {
            error!("Token response carries an empty token");
            return Err(DiscoveryError::MalformedResponse(
                "token response missing token".into(),
            ));
        }

        // Persist the replacement token before consuming the results. An
        // interrupted request after this point must not corrupt the
        // token/number-set pairing.
        if let Some(state) = &self.persistent_state {
            state.save(&token_response.token, !had_token, &new_e164s)?;
        }

        let ack = ClientRequest {
            token_ack: true,
            ..ClientRequest::default()
        };
        let ack_bytes = serde_json::to_vec(&ack)
            .map_err(|e| DiscoveryError::Unknown(format!("ack encoding: {e}")))?;

        let responses = channel
            .send_and_receive_all(ack_bytes)
            .await
            .map_err(|e| self.classify(e))?;

        let mut results = Vec::new();
        for response in responses {
            let response: ClientResponse = serde_json::from_slice(&response)
                .map_err(|e| DiscoveryError::MalformedResponse(format!("result response: {e}")))?;
            results.extend(decode_triples(&response.e164_pni_aci_triples)?);
        }

        info!("Discovery round resolved {} numbers", results.len());
        Ok(results)
    }

    /// Map a channel failure onto the discovery taxonomy. Rejected tokens
    /// also reset the persisted diff state so the next round starts clean.
    fn classify(&self, err: ChannelError) -> DiscoveryError {
        match err {
            ChannelError::Closed {
                code: CLOSE_INVALID_TOKEN,
                ..
            } => {
                if let Some(state) = &self.persistent_state {
                    if let Err(reset_err) = state.reset() {
                        warn!("Failed to reset diff state: {}", reset_err);
                    }
                }
                DiscoveryError::InvalidToken
            }
            ChannelError::Closed {
                code: CLOSE_RATE_LIMITED,
                reason,
            } => {
                let retry_at = Utc::now() + parse_retry_after(&reason);
                warn!("Rate limited until {}", retry_at);
                DiscoveryError::RateLimited { retry_at }
            }
            ChannelError::Closed { code, .. } => {
                DiscoveryError::Server(format!("channel closed with code {code}"))
            }
            ChannelError::Transport(TransportError::Http {
                status: 429,
                retry_after,
            }) => {
                let retry_at = Utc::now()
                    + retry_after
                        .and_then(|d| chrono::Duration::from_std(d).ok())
                        .unwrap_or_else(|| {
                            chrono::Duration::seconds(crate::wire::DEFAULT_RETRY_AFTER_SECS)
                        });
                warn!("Rate limited before socket upgrade until {}", retry_at);
                DiscoveryError::RateLimited { retry_at }
            }
            ChannelError::Transport(TransportError::Http { status, .. })
                if status == 401 || status == 403 =>
            {
                DiscoveryError::Unauthorized
            }
            ChannelError::Transport(TransportError::Http { status, .. })
                if (500..600).contains(&status) =>
            {
                DiscoveryError::Server(format!("http {status}"))
            }
            ChannelError::Transport(TransportError::Http { status, .. }) => {
                DiscoveryError::Client(format!("http {status}"))
            }
            ChannelError::Transport(transport) => {
                DiscoveryError::Network(ChannelError::Transport(transport))
            }
            ChannelError::MalformedFrame(msg) => {
                error!("Malformed frame from enclave: {}", msg);
                DiscoveryError::MalformedResponse(msg)
            }
            other => DiscoveryError::Unknown(other.to_string()),
        }
    }
}

/// Production [`LookupDriver`]: one [`LookupOperation`] per round against
/// the attested channel. One-off user requests run statelessly so automated
/// modes can never burn quota on the user's behalf without a token.
pub struct EnclaveLookupDriver {
    persistent_state: DiffStateStore,
    auth_source: Arc<dyn AuthorizationProofSource>,
    channel_factory: Arc<dyn SecureChannelFactory>,
}

impl EnclaveLookupDriver {
    pub fn new(
        persistent_state: DiffStateStore,
        auth_source: Arc<dyn AuthorizationProofSource>,
        channel_factory: Arc<dyn SecureChannelFactory>,
    ) -> Self {
        Self {
            persistent_state,
            auth_source,
            channel_factory,
        }
    }
}

#[async_trait]
impl LookupDriver for EnclaveLookupDriver {
    async fn perform(&self, e164s: BTreeSet<E164>, mode: DiscoveryMode) -> LookupOutcome {
        let persistent_state = mode.is_stateful().then(|| self.persistent_state.clone());
        LookupOperation::new(
            e164s,
            persistent_state,
            self.auth_source.clone(),
            self.channel_factory.clone(),
        )
        .perform()
        .await
    }
}
