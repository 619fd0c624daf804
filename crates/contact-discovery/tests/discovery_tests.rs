//! Coordinator behavior against a scripted lookup driver: queueing,
//! single-flight, rate-limit cascades, and the undiscoverable cache.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use contact_discovery::{DiscoveryCoordinator, DiscoveryError, LookupDriver, LookupOutcome};
use discovery_state::UndiscoverableCache;
use discovery_types::{DiscoveryMode, DiscoveryResult, E164, Pni};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn e164(s: &str) -> E164 {
    E164::parse(s).unwrap()
}

fn numbers(values: &[&str]) -> BTreeSet<E164> {
    values.iter().map(|s| e164(s)).collect()
}

fn found(number: E164) -> DiscoveryResult {
    DiscoveryResult {
        e164: number,
        pni: Pni::from_bytes([0xaa; 16]),
        aci: None,
    }
}

/// Lookup driver double: replays scripted per-mode outcomes (default
/// `Ok(vec![])`), records every call, and can gate stateful rounds behind a
/// semaphore so tests control when they complete.
struct FakeDriver {
    outcomes: Mutex<HashMap<DiscoveryMode, VecDeque<LookupOutcome>>>,
    calls: Mutex<Vec<(DiscoveryMode, BTreeSet<E164>)>>,
    stateful_gate: Option<Arc<Semaphore>>,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl FakeDriver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            stateful_gate: None,
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        })
    }

    fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            stateful_gate: Some(gate),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        })
    }

    fn script(&self, mode: DiscoveryMode, outcome: LookupOutcome) -> &Self {
        self.outcomes
            .lock()
            .unwrap()
            .entry(mode)
            .or_default()
            .push_back(outcome);
        self
    }

    fn calls(&self) -> Vec<(DiscoveryMode, BTreeSet<E164>)> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LookupDriver for FakeDriver {
    async fn perform(&self, e164s: BTreeSet<E164>, mode: DiscoveryMode) -> LookupOutcome {
        self.calls.lock().unwrap().push((mode, e164s));

        let running = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(running, Ordering::SeqCst);

        if mode.is_stateful() {
            if let Some(gate) = &self.stateful_gate {
                gate.acquire().await.unwrap().forget();
            }
        }

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get_mut(&mode)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Ok(Vec::new()));

        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

fn coordinator(driver: Arc<FakeDriver>) -> DiscoveryCoordinator {
    DiscoveryCoordinator::new(driver, UndiscoverableCache::default())
}

#[tokio::test]
async fn test_empty_request_resolves_without_a_fetch() {
    init_tracing();
    let driver = FakeDriver::new();
    let coord = coordinator(driver.clone());

    let results = coord
        .look_up(BTreeSet::new(), DiscoveryMode::OneOffUserRequest)
        .await
        .unwrap();

    assert!(results.is_empty());
    assert_eq!(driver.call_count(), 0);
}

#[tokio::test]
async fn test_stateful_requests_run_one_at_a_time() {
    init_tracing();
    let gate = Arc::new(Semaphore::new(0));
    let driver = FakeDriver::gated(gate.clone());
    let coord = coordinator(driver.clone());

    let first = coord.look_up(numbers(&["+15551230001"]), DiscoveryMode::OutgoingMessage);
    let second = coord.look_up(numbers(&["+15551230002"]), DiscoveryMode::UuidBackfill);

    sleep(Duration::from_millis(50)).await;
    assert_eq!(driver.call_count(), 1, "second request must stay queued");

    gate.add_permits(1);
    assert_ok!(timeout(Duration::from_secs(5), first).await.unwrap());

    gate.add_permits(1);
    assert_ok!(timeout(Duration::from_secs(5), second).await.unwrap());

    assert_eq!(driver.call_count(), 2);
    assert_eq!(driver.max_concurrent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_one_off_requests_bypass_the_stateful_flight() {
    init_tracing();
    let gate = Arc::new(Semaphore::new(0));
    let driver = FakeDriver::gated(gate.clone());
    let coord = coordinator(driver.clone());

    let stateful = coord.look_up(numbers(&["+15551230001"]), DiscoveryMode::OutgoingMessage);

    // Completes while the stateful round is still held open.
    let one_off = coord.look_up(numbers(&["+15551230002"]), DiscoveryMode::OneOffUserRequest);
    assert_ok!(timeout(Duration::from_secs(5), one_off).await.unwrap());

    gate.add_permits(1);
    assert_ok!(timeout(Duration::from_secs(5), stateful).await.unwrap());
}

#[tokio::test]
async fn test_rate_limits_cascade_down_priority_order() {
    init_tracing();
    let t2 = Utc::now() + ChronoDuration::hours(1);
    let t1 = Utc::now() + ChronoDuration::hours(2);

    let driver = FakeDriver::new();
    driver
        .script(
            DiscoveryMode::OutgoingMessage,
            Err(DiscoveryError::RateLimited { retry_at: t2 }),
        )
        .script(
            DiscoveryMode::UuidBackfill,
            Err(DiscoveryError::RateLimited { retry_at: t1 }),
        );
    let coord = coordinator(driver.clone());

    let err = coord
        .look_up(numbers(&["+15551230001"]), DiscoveryMode::OutgoingMessage)
        .await
        .unwrap_err();
    assert_eq!(err.retry_at(), Some(t2));

    // A window on a lower-priority mode never blocks a higher one.
    let err = coord
        .look_up(numbers(&["+15551230002"]), DiscoveryMode::UuidBackfill)
        .await
        .unwrap_err();
    assert_eq!(err.retry_at(), Some(t1));

    // Both windows bind everything below uuidBackfill; the deadline is the
    // running max down the priority order.
    let err = coord
        .look_up(numbers(&["+15551230003"]), DiscoveryMode::GroupMigration)
        .await
        .unwrap_err();
    assert_eq!(err.retry_at(), Some(t1));

    let err = coord
        .look_up(numbers(&["+15551230004"]), DiscoveryMode::ContactIntersection)
        .await
        .unwrap_err();
    assert_eq!(err.retry_at(), Some(t1));

    // The top-priority mode is unaffected.
    assert_ok!(
        coord
            .look_up(numbers(&["+15551230005"]), DiscoveryMode::OneOffUserRequest)
            .await
    );

    let modes: Vec<DiscoveryMode> = driver.calls().into_iter().map(|(mode, _)| mode).collect();
    assert_eq!(
        modes,
        vec![
            DiscoveryMode::OutgoingMessage,
            DiscoveryMode::UuidBackfill,
            DiscoveryMode::OneOffUserRequest,
        ]
    );
}

#[tokio::test]
async fn test_expired_windows_are_pruned() {
    init_tracing();
    let driver = FakeDriver::new();
    driver.script(
        DiscoveryMode::GroupMigration,
        Err(DiscoveryError::RateLimited {
            retry_at: Utc::now() + ChronoDuration::milliseconds(100),
        }),
    );
    let coord = coordinator(driver.clone());

    let err = coord
        .look_up(numbers(&["+15551230001"]), DiscoveryMode::GroupMigration)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::RateLimited { .. }));

    // Inside the window: rejected without a fetch.
    let err = coord
        .look_up(numbers(&["+15551230001"]), DiscoveryMode::GroupMigration)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::RateLimited { .. }));
    assert_eq!(driver.call_count(), 1);

    sleep(Duration::from_millis(200)).await;

    assert_ok!(
        coord
            .look_up(numbers(&["+15551230001"]), DiscoveryMode::GroupMigration)
            .await
    );
    assert_eq!(driver.call_count(), 2);
}

#[tokio::test]
async fn test_recently_undiscoverable_numbers_skip_the_fetch() {
    init_tracing();
    let driver = FakeDriver::new();
    let coord = coordinator(driver.clone());
    let batch = numbers(&["+15551230001"]);

    // First round resolves nothing, populating the cache.
    assert_ok!(
        coord
            .look_up(batch.clone(), DiscoveryMode::GroupMigration)
            .await
    );
    assert_eq!(driver.call_count(), 1);

    // A repeat for a cache-eligible mode is answered without a fetch.
    let results = coord
        .look_up(batch.clone(), DiscoveryMode::GroupMigration)
        .await
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(driver.call_count(), 1);

    // One-off requests always hit the enclave.
    assert_ok!(
        coord
            .look_up(batch, DiscoveryMode::OneOffUserRequest)
            .await
    );
    assert_eq!(driver.call_count(), 2);
}

#[tokio::test]
async fn test_discovered_numbers_are_evicted_from_the_cache() {
    init_tracing();
    let number = e164("+15551230001");
    let driver = FakeDriver::new();
    driver
        .script(DiscoveryMode::OutgoingMessage, Ok(Vec::new()))
        .script(DiscoveryMode::OutgoingMessage, Ok(vec![found(number)]));
    let coord = coordinator(driver.clone());

    // Round one: undiscoverable. Round two is skipped only if nothing
    // changed, but once a later round finds the number it must be fetched
    // again afterwards.
    assert_ok!(
        coord
            .look_up(numbers(&["+15551230001"]), DiscoveryMode::OutgoingMessage)
            .await
    );

    // The same number plus an unknown one: one stale entry is not enough to
    // skip, so the whole batch is fetched and the number is discovered.
    let results = coord
        .look_up(
            numbers(&["+15551230001", "+15551230002"]),
            DiscoveryMode::OutgoingMessage,
        )
        .await
        .unwrap();
    assert_eq!(results, vec![found(number)]);
    assert_eq!(driver.call_count(), 2);

    // Discovery evicted the entry, so a repeat fetches again.
    assert_ok!(
        coord
            .look_up(numbers(&["+15551230001"]), DiscoveryMode::OutgoingMessage)
            .await
    );
    assert_eq!(driver.call_count(), 3);

    // The partial-batch fetch carried both numbers.
    let calls = driver.calls();
    assert_eq!(calls[1].1, numbers(&["+15551230001", "+15551230002"]));
}
