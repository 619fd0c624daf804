//! In-memory cache of numbers recently confirmed not discoverable.
//!
//! Purely advisory: it only ever skips fetches for modes that can tolerate
//! staleness, and all bookkeeping is best-effort.

use discovery_types::{DiscoveryMode, E164};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Default time-to-live for an undiscoverable entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Default bound on cache size before oldest entries are evicted.
pub const DEFAULT_MAX_ENTRIES: usize = 4096;

/// TTL + LRU cache of phone numbers that recently resolved to nothing.
#[derive(Clone)]
pub struct UndiscoverableCache {
    entries: Arc<RwLock<HashMap<E164, Instant>>>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for UndiscoverableCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

impl UndiscoverableCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            max_entries,
        }
    }

    /// The numbers a request must actually fetch.
    ///
    /// Latency-critical and full-scan modes always fetch everything. For
    /// cache-eligible modes, the fetch is skipped only when *every*
    /// requested number has a fresh undiscoverable entry; one miss sends
    /// the whole batch, since re-sending committed numbers is free under
    /// the diff protocol.
    pub async fn numbers_to_fetch(
        &self,
        requested: &BTreeSet<E164>,
        mode: DiscoveryMode,
    ) -> BTreeSet<E164> {
        if !mode.uses_undiscoverable_cache() {
            return requested.clone();
        }

        let entries = self.entries.read().await;
        let now = Instant::now();
        let all_fresh = requested.iter().all(|e164| {
            entries
                .get(e164)
                .is_some_and(|last_checked| now.duration_since(*last_checked) < self.ttl)
        });

        if all_fresh {
            debug!(
                "Skipping fetch: all {} numbers recently undiscoverable",
                requested.len()
            );
            BTreeSet::new()
        } else {
            requested.clone()
        }
    }

    /// Record the outcome of a completed round: every requested number not
    /// present in the results is undiscoverable as of now.
    pub async fn record_round(&self, requested: &BTreeSet<E164>, discovered: &BTreeSet<E164>) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        for e164 in requested {
            if discovered.contains(e164) {
                entries.remove(e164);
            } else {
                entries.insert(*e164, now);
            }
        }

        // Evict expired entries, then oldest ones under size pressure.
        let ttl = self.ttl;
        entries.retain(|_, last_checked| now.duration_since(*last_checked) < ttl);
        while entries.len() > self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, last_checked)| **last_checked)
                .map(|(e164, _)| *e164);
            match oldest {
                Some(e164) => entries.remove(&e164),
                None => break,
            };
        }
    }

    /// Number of live entries, for tests and diagnostics.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
