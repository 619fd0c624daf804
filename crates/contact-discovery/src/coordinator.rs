//! The single public entry point for discovery lookups.
//!
//! Queues caller requests, enforces one in-flight stateful request at a
//! time, cascades rate-limit deadlines down the fixed mode priority order,
//! and drives the lookup engine on spawned tasks. Callers are never
//! blocked: `look_up` enqueues and returns a future immediately.

use crate::error::DiscoveryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use discovery_state::UndiscoverableCache;
use discovery_types::{DiscoveryMode, DiscoveryResult, E164};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

/// Outcome delivered to a caller's future.
pub type LookupOutcome = Result<Vec<DiscoveryResult>, DiscoveryError>;

/// Performs one discovery round. Implemented by the enclave engine in
/// production and by fakes in tests.
#[async_trait]
pub trait LookupDriver: Send + Sync {
    async fn perform(&self, e164s: BTreeSet<E164>, mode: DiscoveryMode) -> LookupOutcome;
}

struct PendingRequest {
    mode: DiscoveryMode,
    e164s: BTreeSet<E164>,
    responder: oneshot::Sender<LookupOutcome>,
}

/// Scheduler state. Guarded by a single exclusive lock; all network I/O
/// happens outside the critical section.
struct Scheduler {
    queue: VecDeque<PendingRequest>,
    stateful_running: bool,
    retry_windows: HashMap<DiscoveryMode, DateTime<Utc>>,
}

impl Scheduler {
    /// The net effective deadline per mode: a deadline on any mode also
    /// binds every lower-priority mode, never a higher-priority one.
    fn effective_deadlines(&mut self, now: DateTime<Utc>) -> HashMap<DiscoveryMode, DateTime<Utc>> {
        self.retry_windows.retain(|_, deadline| *deadline > now);

        let mut effective = HashMap::new();
        let mut carried: Option<DateTime<Utc>> = None;
        for mode in DiscoveryMode::in_priority_order() {
            if let Some(own) = self.retry_windows.get(&mode) {
                carried = Some(carried.map_or(*own, |c| c.max(*own)));
            }
            if let Some(deadline) = carried {
                effective.insert(mode, deadline);
            }
        }
        effective
    }

    /// Merge a freshly reported deadline into the window for `mode`.
    fn record_rate_limit(&mut self, mode: DiscoveryMode, retry_at: DateTime<Utc>) {
        let window = self.retry_windows.entry(mode).or_insert(retry_at);
        *window = (*window).max(retry_at);
    }
}

pub struct DiscoveryCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    driver: Arc<dyn LookupDriver>,
    cache: UndiscoverableCache,
    scheduler: Mutex<Scheduler>,
}

impl DiscoveryCoordinator {
    pub fn new(driver: Arc<dyn LookupDriver>, cache: UndiscoverableCache) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                driver,
                cache,
                scheduler: Mutex::new(Scheduler {
                    queue: VecDeque::new(),
                    stateful_running: false,
                    retry_windows: HashMap::new(),
                }),
            }),
        }
    }

    /// Look up which of `e164s` correspond to active accounts.
    ///
    /// Enqueues immediately and returns a future for the outcome. Requests
    /// rejected by an active rate-limit window resolve with
    /// [`DiscoveryError::RateLimited`] carrying the effective deadline.
    #[instrument(skip(self, e164s), fields(count = e164s.len()))]
    pub fn look_up(
        &self,
        e164s: BTreeSet<E164>,
        mode: DiscoveryMode,
    ) -> impl Future<Output = LookupOutcome> {
        let (responder, receiver) = oneshot::channel();

        if e164s.is_empty() {
            let _ = responder.send(Ok(Vec::new()));
        } else {
            {
                let mut scheduler = self.inner.scheduler.lock().expect("scheduler lock poisoned");
                scheduler.queue.push_back(PendingRequest {
                    mode,
                    e164s: e164s.clone(),
                    responder,
                });
            }
            Self::schedule(&self.inner);
        }

        async move {
            receiver
                .await
                .unwrap_or_else(|_| Err(DiscoveryError::Unknown("lookup task dropped".into())))
        }
    }

    /// Scan the queue: reject rate-limited requests, start what the
    /// single-stateful-flight rule allows, keep the rest queued.
    fn schedule(inner: &Arc<CoordinatorInner>) {
        let mut to_start = Vec::new();
        {
            let mut scheduler = inner.scheduler.lock().expect("scheduler lock poisoned");
            let now = Utc::now();
            let deadlines = scheduler.effective_deadlines(now);

            let mut still_queued = VecDeque::new();
            while let Some(request) = scheduler.queue.pop_front() {
                if let Some(deadline) = deadlines.get(&request.mode).filter(|d| **d > now) {
                    debug!(
                        "Rejecting {:?} request rate-limited until {}",
                        request.mode, deadline
                    );
                    let _ = request
                        .responder
                        .send(Err(DiscoveryError::RateLimited {
                            retry_at: *deadline,
                        }));
                } else if !request.mode.is_stateful() {
                    // Stateless requests never contend for the diff token.
                    to_start.push(request);
                } else if !scheduler.stateful_running {
                    scheduler.stateful_running = true;
                    to_start.push(request);
                } else {
                    still_queued.push_back(request);
                }
            }
            scheduler.queue = still_queued;
        }

        for request in to_start {
            Self::spawn_request(inner.clone(), request);
        }
    }

    fn spawn_request(inner: Arc<CoordinatorInner>, request: PendingRequest) {
        tokio::spawn(async move {
            let result = Self::run_request(&inner, request.mode, &request.e164s).await;

            {
                let mut scheduler = inner.scheduler.lock().expect("scheduler lock poisoned");
                if let Err(DiscoveryError::RateLimited { retry_at }) = &result {
                    scheduler.record_rate_limit(request.mode, *retry_at);
                }
                if request.mode.is_stateful() {
                    scheduler.stateful_running = false;
                }
            }

            if request.responder.send(result).is_err() {
                // Caller gave up; the round still completed and updated
                // shared state.
                warn!("Dropping result for abandoned {:?} request", request.mode);
            }

            Self::schedule(&inner);
        });
    }

    async fn run_request(
        inner: &CoordinatorInner,
        mode: DiscoveryMode,
        e164s: &BTreeSet<E164>,
    ) -> LookupOutcome {
        let to_fetch = inner.cache.numbers_to_fetch(e164s, mode).await;
        if to_fetch.is_empty() {
            debug!("All requested numbers recently undiscoverable; skipping fetch");
            return Ok(Vec::new());
        }

        let results = inner.driver.perform(to_fetch.clone(), mode).await?;

        let discovered: BTreeSet<E164> = results.iter().map(|r| r.e164).collect();
        inner.cache.record_round(&to_fetch, &discovered).await;

        Ok(results)
    }
}
