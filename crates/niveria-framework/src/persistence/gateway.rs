//! Persistence gateway: asynchronous write-behind / read-through layer over a
//! [`DocumentStore`].
//!
//! Writes are coalesced per record and flushed in batches on a fixed
//! interval, or as soon as the queue reaches its size threshold. Failed
//! writes back off exponentially; exhausted ones are parked, reported with a
//! [`CapabilityEvent::DurableWriteFailed`], and re-queued after the next
//! successful connectivity check.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use niveria_core::{
    CapabilityError, CapabilityEvent, CapabilityKind, CapabilityResult, DocumentStore,
    EntityKey, RetryPolicy, StoreError, StoredDocument, Value,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::queue::{FailOutcome, FailedWrite, PendingWrite, WriteQueue};
use crate::bus::EventBus;
use crate::cache::RecordId;

// =============================================================================
// Settings
// =============================================================================

/// Batching, timeout and retry settings.
#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    /// Interval between periodic flushes.
    pub flush_interval: Duration,
    /// Queue depth that triggers an early flush; also the batch size.
    pub batch_size: usize,
    /// Time budget of one store round-trip.
    pub timeout: Duration,
    /// Interval between connectivity checks while writes are parked.
    pub connectivity_check: Duration,
    /// Backoff for failed writes.
    pub retry: RetryPolicy,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(2),
            batch_size: 64,
            timeout: Duration::from_secs(5),
            connectivity_check: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome counters of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Writes acknowledged by the store.
    pub written: usize,
    /// Writes that failed and were scheduled for retry.
    pub retrying: usize,
    /// Writes that exhausted their budget during this pass.
    pub failed: usize,
}

/// Queue depths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Writes waiting for a flush.
    pub pending: usize,
    /// Writes handed to the store.
    pub in_flight: usize,
    /// Writes parked after exhausting retries.
    pub failed: usize,
}

// =============================================================================
// PersistenceGateway
// =============================================================================

/// The persistence gateway. Shared as `Arc<PersistenceGateway>`.
pub struct PersistenceGateway {
    store: Arc<dyn DocumentStore>,
    settings: PersistenceSettings,
    queue: Mutex<WriteQueue>,
    versions: AtomicU64,
    wake: Notify,
    consumer: tokio::sync::Mutex<()>,
    bus: Arc<EventBus>,
}

impl PersistenceGateway {
    /// Creates a gateway over `store`, reporting outcomes on `bus`.
    pub fn new(store: Arc<dyn DocumentStore>, settings: PersistenceSettings, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            settings,
            queue: Mutex::new(WriteQueue::default()),
            versions: AtomicU64::new(0),
            wake: Notify::new(),
            consumer: tokio::sync::Mutex::new(()),
            bus,
        }
    }

    /// Name of the backing store.
    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// The settings this gateway was built with.
    pub fn settings(&self) -> &PersistenceSettings {
        &self.settings
    }

    // ─── Writes ──────────────────────────────────────────────────────────────

    /// Queues a write and returns its version.
    pub fn enqueue_write(&self, key: EntityKey, kind: CapabilityKind, payload: Value) -> u64 {
        self.enqueue(key, kind, payload, BTreeSet::new(), None)
    }

    /// Queues a write that also removes the top-level fields in `removed`.
    pub fn enqueue_update(
        &self,
        key: EntityKey,
        kind: CapabilityKind,
        payload: Value,
        removed: BTreeSet<String>,
    ) -> u64 {
        self.enqueue(key, kind, payload, removed, None)
    }

    /// Queues a write and returns its version plus a receiver resolving to
    /// the durable outcome (acknowledged, or `DurableWriteFailed`).
    pub fn enqueue_durable(
        &self,
        key: EntityKey,
        kind: CapabilityKind,
        payload: Value,
        removed: BTreeSet<String>,
    ) -> (u64, oneshot::Receiver<CapabilityResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (self.enqueue(key, kind, payload, removed, Some(tx)), rx)
    }

    fn enqueue(
        &self,
        key: EntityKey,
        kind: CapabilityKind,
        payload: Value,
        removed: BTreeSet<String>,
        waiter: Option<oneshot::Sender<CapabilityResult<()>>>,
    ) -> u64 {
        let version = self.versions.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(key = %key, kind = %kind, version, removed = removed.len(), "Write queued");
        let write = PendingWrite {
            key,
            kind,
            payload,
            removed,
            attempts: 0,
            next_retry_at: Instant::now(),
            version,
            written_at: Utc::now(),
            waiters: waiter.into_iter().collect(),
        };
        let depth = self.queue.lock().enqueue(write);
        if depth >= self.settings.batch_size {
            self.wake.notify_one();
        }
        version
    }

    /// Writes every due record to the store, one batch at a time.
    ///
    /// `ignore_backoff` flushes records still in backoff (used on shutdown).
    pub async fn flush_due(&self, ignore_backoff: bool) -> FlushReport {
        let _consumer = self.consumer.lock().await;
        let mut report = FlushReport::default();

        loop {
            let batch = self
                .queue
                .lock()
                .take_due(Instant::now(), self.settings.batch_size.max(1), ignore_backoff);
            if batch.is_empty() {
                break;
            }
            let full = batch.len() >= self.settings.batch_size;

            let documents = batch
                .iter()
                .map(|w| {
                    StoredDocument::from_write(w.key.clone(), w.kind, w.payload.clone(), w.written_at)
                        .with_removed(w.removed.iter().cloned())
                })
                .collect();
            let results = match tokio::time::timeout(self.settings.timeout, self.store.write_batch(documents)).await {
                Ok(results) => results,
                Err(_) => Vec::new(),
            };
            let mut results = results.into_iter();

            let mut events = Vec::new();
            let mut clean = true;
            {
                let mut queue = self.queue.lock();
                for write in batch {
                    let result = results
                        .next()
                        .unwrap_or(Err(StoreError::Timeout(self.settings.timeout)));
                    let (key, kind, version) = (write.key.clone(), write.kind, write.version);

                    match result {
                        Ok(()) => {
                            queue.acknowledge(write);
                            report.written += 1;
                            events.push(CapabilityEvent::WriteAcknowledged { key, kind, version });
                        }
                        Err(err) => {
                            clean = false;
                            let reason = err.to_string();
                            match queue.fail(write, reason.clone(), &self.settings.retry, Instant::now()) {
                                FailOutcome::Retrying { attempts, delay } => {
                                    report.retrying += 1;
                                    warn!(
                                        key = %key,
                                        kind = %kind,
                                        attempts,
                                        retry_in = ?delay,
                                        error = %reason,
                                        "Write failed, retrying"
                                    );
                                }
                                FailOutcome::Exhausted(failed) => {
                                    report.failed += 1;
                                    error!(
                                        key = %key,
                                        kind = %kind,
                                        attempts = failed.attempts,
                                        error = %reason,
                                        "Write exhausted its retries, parked until the store is reachable"
                                    );
                                    events.push(CapabilityEvent::DurableWriteFailed {
                                        key,
                                        kind,
                                        attempts: failed.attempts,
                                        reason,
                                    });
                                }
                                FailOutcome::Superseded => {
                                    debug!(key = %key, kind = %kind, "Failed write superseded by a newer one");
                                }
                                FailOutcome::Unknown => {}
                            }
                        }
                    }
                }
            }

            for event in events {
                self.bus.publish(event);
            }
            if !clean || !full {
                break;
            }
        }

        if report != FlushReport::default() {
            debug!(store = %self.store.name(), ?report, "Flush pass complete");
        }
        report
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    /// Loads the persisted value of a record.
    ///
    /// Writes not yet confirmed by the store take precedence, so a reload
    /// after eviction still observes local writes.
    pub async fn load_snapshot(&self, key: &EntityKey, kind: CapabilityKind) -> CapabilityResult<Option<Value>> {
        let id = RecordId::new(key.clone(), kind);
        if let Some(value) = self.queue.lock().overlay(&id) {
            trace!(key = %key, kind = %kind, "Snapshot served from write queue");
            return Ok(Some(value));
        }

        match tokio::time::timeout(self.settings.timeout, self.store.load(key, kind)).await {
            Ok(Ok(document)) => Ok(document.map(|d| d.value)),
            Ok(Err(err)) => Err(err.into_capability()),
            Err(_) => Err(CapabilityError::PersistenceTimeout {
                after: self.settings.timeout,
            }),
        }
    }

    /// Newest queued payload for a record, if any.
    pub fn pending_payload(&self, key: &EntityKey, kind: CapabilityKind) -> Option<Value> {
        self.queue.lock().overlay(&RecordId::new(key.clone(), kind))
    }

    // ─── Connectivity ────────────────────────────────────────────────────────

    /// Round-trip check against the store.
    pub async fn ping(&self) -> CapabilityResult<Duration> {
        match tokio::time::timeout(self.settings.timeout, self.store.ping()).await {
            Ok(result) => result.map_err(StoreError::into_capability),
            Err(_) => Err(CapabilityError::PersistenceTimeout {
                after: self.settings.timeout,
            }),
        }
    }

    /// Pings the store while writes are parked; on success re-queues them.
    /// Returns the number of writes re-queued.
    pub async fn check_connectivity(&self) -> usize {
        if self.queue.lock().failed_len() == 0 {
            return 0;
        }
        match self.ping().await {
            Ok(rtt) => {
                let requeued = self.queue.lock().requeue_failed(Instant::now());
                if requeued > 0 {
                    info!(store = %self.store.name(), requeued, ?rtt, "Store reachable again, re-queued parked writes");
                    self.wake.notify_one();
                }
                requeued
            }
            Err(err) => {
                debug!(store = %self.store.name(), error = %err, "Store still unreachable");
                0
            }
        }
    }

    /// Re-queues every parked write immediately, without a connectivity check.
    pub fn retry_failed(&self) -> usize {
        let requeued = self.queue.lock().requeue_failed(Instant::now());
        if requeued > 0 {
            info!(requeued, "Parked writes re-queued by operator");
            self.wake.notify_one();
        }
        requeued
    }

    /// Writes parked after exhausting their retries.
    pub fn failed_writes(&self) -> Vec<FailedWrite> {
        self.queue.lock().failed_writes()
    }

    /// Current queue depths.
    pub fn queue_stats(&self) -> QueueStats {
        let queue = self.queue.lock();
        QueueStats {
            pending: queue.pending_len(),
            in_flight: queue.in_flight_len(),
            failed: queue.failed_len(),
        }
    }

    // ─── Flusher task ────────────────────────────────────────────────────────

    /// Spawns the single queue consumer.
    ///
    /// The task flushes on every interval tick or size-threshold wake-up,
    /// checks connectivity while writes are parked, and performs a final
    /// flush that ignores backoff once `shutdown` is cancelled.
    pub fn spawn_flusher(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<FlushReport> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move { gateway.run_flusher(shutdown).await })
    }

    async fn run_flusher(&self, shutdown: CancellationToken) -> FlushReport {
        let mut flush_tick = tokio::time::interval(self.settings.flush_interval);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut connectivity_tick = tokio::time::interval(self.settings.connectivity_check);
        connectivity_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(store = %self.store.name(), interval = ?self.settings.flush_interval, "Flusher started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = flush_tick.tick() => {
                    self.flush_due(false).await;
                }
                _ = self.wake.notified() => {
                    self.flush_due(false).await;
                }
                _ = connectivity_tick.tick() => {
                    self.check_connectivity().await;
                }
            }
        }

        let report = self.flush_due(true).await;
        let stats = self.queue_stats();
        if stats.pending + stats.failed > 0 {
            warn!(pending = stats.pending, failed = stats.failed, "Flusher stopped with unwritten records");
        } else {
            info!(written = report.written, "Flusher stopped, queue drained");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use niveria_core::StoreResult;
    use serde_json::json;

    fn player(n: u128) -> EntityKey {
        EntityKey::new(uuid::Uuid::from_u128(n))
    }

    fn gateway(store: Arc<MemoryStore>, retry: RetryPolicy) -> (Arc<PersistenceGateway>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let settings = PersistenceSettings {
            flush_interval: Duration::from_secs(3600),
            batch_size: 8,
            timeout: Duration::from_secs(1),
            connectivity_check: Duration::from_secs(3600),
            retry,
        };
        (Arc::new(PersistenceGateway::new(store, settings, Arc::clone(&bus))), bus)
    }

    const KIND: CapabilityKind = CapabilityKind::ProfileStore;

    #[tokio::test]
    async fn test_outage_coalesces_and_flushes_on_recovery() {
        let store = Arc::new(MemoryStore::new());
        let (gateway, _bus) = gateway(Arc::clone(&store), RetryPolicy::immediate(5));
        store.set_reachable(false);

        gateway.enqueue_write(player(1), KIND, json!({"coins": 1}));
        gateway.flush_due(false).await;
        gateway.enqueue_write(player(1), KIND, json!({"coins": 2}));
        gateway.enqueue_write(player(1), KIND, json!({"coins": 3}));
        assert_eq!(gateway.queue_stats().pending, 1);

        store.set_reachable(true);
        let report = gateway.flush_due(false).await;
        assert_eq!(report.written, 1);
        assert_eq!(store.document(&player(1), KIND).unwrap().value, json!({"coins": 3}));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_write_is_reported_then_requeued() {
        let store = Arc::new(MemoryStore::new());
        let (gateway, bus) = gateway(Arc::clone(&store), RetryPolicy::immediate(3));
        let (_id, mut events) = bus.stream();
        store.set_reachable(false);

        let (_, outcome) = gateway.enqueue_durable(player(1), KIND, json!({"rank": "gold"}), BTreeSet::new());
        for _ in 0..5 {
            gateway.flush_due(false).await;
        }
        assert_eq!(store.failed_attempts(), 3);
        assert!(matches!(
            outcome.await.unwrap(),
            Err(CapabilityError::DurableWriteFailed { attempts: 3, .. })
        ));
        assert!(matches!(
            events.recv().await,
            Some(CapabilityEvent::DurableWriteFailed { attempts: 3, .. })
        ));
        assert_eq!(gateway.failed_writes().len(), 1);

        // Still down: nothing moves.
        assert_eq!(gateway.check_connectivity().await, 0);

        store.set_reachable(true);
        assert_eq!(gateway.check_connectivity().await, 1);
        gateway.flush_due(false).await;
        assert!(gateway.failed_writes().is_empty());
        assert_eq!(store.document(&player(1), KIND).unwrap().value, json!({"rank": "gold"}));
    }

    #[tokio::test]
    async fn test_snapshot_prefers_unflushed_writes() {
        let store = Arc::new(MemoryStore::new());
        let (gateway, _bus) = gateway(Arc::clone(&store), RetryPolicy::default());

        gateway.enqueue_write(player(1), KIND, json!({"v": 1}));
        gateway.flush_due(false).await;
        gateway.enqueue_write(player(1), KIND, json!({"v": 2}));

        let snapshot = gateway.load_snapshot(&player(1), KIND).await.unwrap();
        assert_eq!(snapshot, Some(json!({"v": 2})));
        assert_eq!(gateway.load_snapshot(&player(2), KIND).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_removed_fields_reach_the_store() {
        let store = Arc::new(MemoryStore::new());
        let (gateway, _bus) = gateway(Arc::clone(&store), RetryPolicy::default());

        gateway.enqueue_write(player(1), KIND, json!({"coins": 1, "ban": "reason"}));
        gateway.flush_due(false).await;
        gateway.enqueue_update(player(1), KIND, json!({"coins": 1}), BTreeSet::from(["ban".to_string()]));
        gateway.flush_due(false).await;

        let document = store.document(&player(1), KIND).unwrap();
        assert_eq!(document.value, json!({"coins": 1}));
        assert!(document.tombstones.contains_key("ban"));
    }

    #[tokio::test]
    async fn test_durable_waiter_sees_acknowledgement() {
        let store = Arc::new(MemoryStore::new());
        let (gateway, bus) = gateway(Arc::clone(&store), RetryPolicy::default());
        let (_id, mut events) = bus.stream();

        let (version, outcome) = gateway.enqueue_durable(player(1), KIND, json!(true), BTreeSet::new());
        gateway.flush_due(false).await;
        assert!(outcome.await.unwrap().is_ok());
        assert_eq!(
            events.recv().await,
            Some(CapabilityEvent::WriteAcknowledged {
                key: player(1),
                kind: KIND,
                version
            })
        );
    }

    #[tokio::test]
    async fn test_size_threshold_wakes_flusher() {
        let store = Arc::new(MemoryStore::new());
        let (gateway, bus) = gateway(Arc::clone(&store), RetryPolicy::default());
        let (_id, mut events) = bus.stream();
        let shutdown = CancellationToken::new();
        let flusher = gateway.spawn_flusher(shutdown.clone());

        for n in 0..8 {
            gateway.enqueue_write(player(n), KIND, json!(n as u64));
        }
        for _ in 0..8 {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await;
            assert!(matches!(event, Ok(Some(CapabilityEvent::WriteAcknowledged { .. }))));
        }

        shutdown.cancel();
        flusher.await.unwrap();
        assert_eq!(store.len(), 8);
    }

    #[tokio::test]
    async fn test_final_flush_ignores_backoff() {
        let store = Arc::new(MemoryStore::new());
        let retry = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(600),
            max_delay: Duration::from_secs(600),
            multiplier: 2.0,
            jitter: false,
        };
        let (gateway, _bus) = gateway(Arc::clone(&store), retry);
        store.set_reachable(false);
        gateway.enqueue_write(player(1), KIND, json!("late"));
        gateway.flush_due(false).await;

        store.set_reachable(true);
        assert_eq!(gateway.flush_due(false).await.written, 0);
        assert_eq!(gateway.flush_due(true).await.written, 1);
    }

    struct StalledStore;

    #[async_trait]
    impl DocumentStore for StalledStore {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn load(&self, _key: &EntityKey, _kind: CapabilityKind) -> StoreResult<Option<StoredDocument>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn write(&self, _document: StoredDocument) -> StoreResult<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn ping(&self) -> StoreResult<Duration> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Duration::ZERO)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_round_trips_are_bounded() {
        let bus = Arc::new(EventBus::new());
        let settings = PersistenceSettings {
            timeout: Duration::from_millis(100),
            retry: RetryPolicy::immediate(2),
            ..PersistenceSettings::default()
        };
        let gateway = PersistenceGateway::new(Arc::new(StalledStore), settings, bus);

        assert!(matches!(
            gateway.load_snapshot(&player(1), KIND).await,
            Err(CapabilityError::PersistenceTimeout { .. })
        ));
        assert!(matches!(gateway.ping().await, Err(CapabilityError::PersistenceTimeout { .. })));

        gateway.enqueue_write(player(1), KIND, json!(1));
        let report = gateway.flush_due(false).await;
        assert_eq!(report.retrying, 1);
    }
}
