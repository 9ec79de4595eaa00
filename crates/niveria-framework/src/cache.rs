//! Entity cache: size- and time-bounded, single-flight, provider-agnostic.
//!
//! Records are keyed by `(EntityKey, CapabilityKind)`. The cache owns the
//! invalidation rules:
//!
//! - **TTL**: every record carries the TTL of its kind. An expired record is
//!   never returned without a re-fetch attempt first.
//! - **Capacity**: least-recently-used eviction, preferring clean records
//!   over dirty ones (dirty records still have a queued write).
//! - **Single-flight**: concurrent [`get_or_load`](EntityCache::get_or_load)
//!   calls for the same missing record share one loader run. The loader runs
//!   on its own task, so a caller that goes away does not cancel it.
//! - **Failures are not cached**. A transient failure after expiry serves
//!   the last-known-good value instead and leaves the record expired.
//! - **Supersession**: [`invalidate`](EntityCache::invalidate),
//!   [`invalidate_all`](EntityCache::invalidate_all) and
//!   [`put_local`](EntityCache::put_local) detach any in-flight load for the
//!   same record, so its result is handed to existing waiters but never
//!   stored.
//! - **Generations**: `invalidate_all` bumps a per-kind generation. A load
//!   whose caller resolved its provider under an older generation is never
//!   stored.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use niveria_core::{CapabilityError, CapabilityKind, CapabilityResult, EntityKey};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

// =============================================================================
// Records
// =============================================================================

/// Identity of one cached record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId {
    /// Entity the record belongs to.
    pub key: EntityKey,
    /// Capability of the record.
    pub kind: CapabilityKind,
}

impl RecordId {
    /// Creates a record id.
    pub fn new(key: EntityKey, kind: CapabilityKind) -> Self {
        Self { key, kind }
    }
}

/// A materialized capability result held by the cache.
#[derive(Debug, Clone)]
pub struct CachedRecord<T> {
    /// Entity the record belongs to.
    pub key: EntityKey,
    /// Capability of the record.
    pub kind: CapabilityKind,
    /// The cached value.
    pub value: T,
    /// When the value was loaded or locally written.
    pub fetched_at: Instant,
    /// `true` while a local write is not yet acknowledged by the store.
    pub dirty: bool,
    /// Lifetime of this record.
    pub ttl: Duration,
}

impl<T> CachedRecord<T> {
    /// Returns `true` once the TTL has elapsed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) >= self.ttl
    }
}

// =============================================================================
// Settings & stats
// =============================================================================

/// Capacity and TTL settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Maximum number of records held.
    pub capacity: usize,
    /// TTL for kinds without an override.
    pub default_ttl: Duration,
    /// Per-kind TTL overrides.
    pub ttl: HashMap<CapabilityKind, Duration>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            default_ttl: Duration::from_secs(300),
            ttl: HashMap::from([
                (CapabilityKind::Permissions, Duration::from_secs(60)),
                (CapabilityKind::LandClaim, Duration::from_secs(900)),
            ]),
        }
    }
}

impl CacheSettings {
    /// TTL applied to records of `kind`.
    pub fn ttl_for(&self, kind: CapabilityKind) -> Duration {
        self.ttl.get(&kind).copied().unwrap_or(self.default_ttl)
    }
}

/// Counters for operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Records currently held.
    pub entries: usize,
    /// Records with an unacknowledged local write.
    pub dirty: usize,
    /// Loads currently in flight.
    pub in_flight: usize,
    /// Lookups answered from a fresh record.
    pub hits: u64,
    /// Lookups that needed a load (joined or started).
    pub misses: u64,
    /// Loader runs started.
    pub loads: u64,
    /// Records dropped for capacity.
    pub evictions: u64,
    /// Expired values served because a re-fetch failed transiently.
    pub stale_served: u64,
}

// =============================================================================
// Internal state
// =============================================================================

type SharedLoad<T> = Shared<BoxFuture<'static, CapabilityResult<T>>>;

struct Slot<T> {
    record: CachedRecord<T>,
    tick: u64,
    version: u64,
}

struct InFlight<T> {
    token: u64,
    generation: u64,
    load: SharedLoad<T>,
}

struct CacheState<T> {
    slots: HashMap<RecordId, Slot<T>>,
    /// Recency index: tick → record, oldest first.
    recency: BTreeMap<u64, RecordId>,
    loads: HashMap<RecordId, InFlight<T>>,
    generations: HashMap<CapabilityKind, u64>,
    clock: u64,
    next_token: u64,
    stats: CacheStats,
}

impl<T: Clone> CacheState<T> {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            recency: BTreeMap::new(),
            loads: HashMap::new(),
            generations: HashMap::new(),
            clock: 0,
            next_token: 0,
            stats: CacheStats::default(),
        }
    }

    fn generation(&self, kind: CapabilityKind) -> u64 {
        self.generations.get(&kind).copied().unwrap_or(0)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Returns the value if present and fresh, marking it recently used.
    fn fresh(&mut self, id: &RecordId, now: Instant) -> Option<T> {
        let tick = self.tick();
        let slot = self.slots.get_mut(id)?;
        if slot.record.is_expired(now) {
            return None;
        }
        let previous = std::mem::replace(&mut slot.tick, tick);
        let value = slot.record.value.clone();
        self.recency.remove(&previous);
        self.recency.insert(tick, id.clone());
        Some(value)
    }

    fn insert(&mut self, id: RecordId, record: CachedRecord<T>, version: u64, capacity: usize) {
        let tick = self.tick();
        if let Some(old) = self.slots.insert(
            id.clone(),
            Slot {
                record,
                tick,
                version,
            },
        ) {
            self.recency.remove(&old.tick);
        }
        self.recency.insert(tick, id);
        self.evict(capacity);
    }

    fn remove(&mut self, id: &RecordId) -> bool {
        let detached = self.loads.remove(id).is_some();
        match self.slots.remove(id) {
            Some(slot) => {
                self.recency.remove(&slot.tick);
                true
            }
            None => detached,
        }
    }

    /// Evicts least-recently-used records until within `capacity`,
    /// taking clean records before dirty ones.
    fn evict(&mut self, capacity: usize) {
        while self.slots.len() > capacity {
            let victim = self
                .recency
                .iter()
                .find(|(_, id)| self.slots.get(*id).is_some_and(|s| !s.record.dirty))
                .or_else(|| self.recency.iter().next())
                .map(|(tick, id)| (*tick, id.clone()));
            let Some((tick, id)) = victim else { break };
            self.recency.remove(&tick);
            if let Some(slot) = self.slots.remove(&id) {
                trace!(key = %id.key, kind = %id.kind, dirty = slot.record.dirty, "Evicted record");
            }
            self.stats.evictions += 1;
        }
    }
}

// =============================================================================
// EntityCache
// =============================================================================

/// The entity cache. Shared as `Arc<EntityCache<T>>`.
pub struct EntityCache<T> {
    settings: CacheSettings,
    state: Mutex<CacheState<T>>,
}

impl<T> EntityCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty cache.
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(CacheState::new()),
        }
    }

    /// The settings this cache was built with.
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Returns the cached value if present and fresh.
    pub fn get(&self, key: &EntityKey, kind: CapabilityKind) -> Option<T> {
        let id = RecordId::new(key.clone(), kind);
        let mut state = self.state.lock();
        let value = state.fresh(&id, Instant::now());
        if value.is_some() {
            state.stats.hits += 1;
        }
        value
    }

    /// Returns a copy of the record, fresh or not, without touching recency.
    pub fn peek(&self, key: &EntityKey, kind: CapabilityKind) -> Option<CachedRecord<T>> {
        let id = RecordId::new(key.clone(), kind);
        self.state.lock().slots.get(&id).map(|s| s.record.clone())
    }

    /// Current generation of `kind`; bumped by [`invalidate_all`](Self::invalidate_all).
    pub fn generation(&self, kind: CapabilityKind) -> u64 {
        self.state.lock().generation(kind)
    }

    /// Returns the fresh cached value, or runs `loader` to populate it.
    ///
    /// At most one loader runs per record at a time; concurrent callers
    /// await the same result. The loader is spawned onto the Tokio runtime
    /// and completes even if every caller goes away.
    pub async fn get_or_load<F, Fut>(
        self: &Arc<Self>,
        key: &EntityKey,
        kind: CapabilityKind,
        loader: F,
    ) -> CapabilityResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CapabilityResult<T>> + Send + 'static,
    {
        let generation = self.generation(kind);
        self.get_or_load_at(key, kind, generation, loader).await
    }

    /// Like [`get_or_load`](Self::get_or_load) for a caller that picked its
    /// loader under `generation`. If the kind was invalidated since, the
    /// loader still answers this caller but its result is not cached.
    ///
    /// `loader` is called without holding the cache lock.
    pub async fn get_or_load_at<F, Fut>(
        self: &Arc<Self>,
        key: &EntityKey,
        kind: CapabilityKind,
        generation: u64,
        loader: F,
    ) -> CapabilityResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CapabilityResult<T>> + Send + 'static,
    {
        let id = RecordId::new(key.clone(), kind);
        let joined = {
            let mut state = self.state.lock();
            if let Some(value) = state.fresh(&id, Instant::now()) {
                state.stats.hits += 1;
                return Ok(value);
            }
            state.stats.misses += 1;
            state.loads.get(&id).map(|in_flight| in_flight.load.clone())
        };
        if let Some(load) = joined {
            trace!(key = %key, kind = %kind, "Joining in-flight load");
            return load.await;
        }

        let pending = loader();

        let load = {
            let mut state = self.state.lock();
            if let Some(value) = state.fresh(&id, Instant::now()) {
                return Ok(value);
            }
            match state.loads.get(&id) {
                Some(in_flight) => {
                    trace!(key = %key, kind = %kind, "Joining load started concurrently");
                    in_flight.load.clone()
                }
                None => {
                    state.next_token += 1;
                    let token = state.next_token;
                    state.stats.loads += 1;
                    let load = self.spawn_load(id.clone(), token, pending);
                    if state.generation(kind) == generation {
                        state.loads.insert(
                            id,
                            InFlight {
                                token,
                                generation,
                                load: load.clone(),
                            },
                        );
                    } else {
                        debug!(key = %key, kind = %kind, "Kind invalidated since lookup began, result will not be cached");
                    }
                    load
                }
            }
        };
        load.await
    }

    fn spawn_load<Fut>(self: &Arc<Self>, id: RecordId, token: u64, loader: Fut) -> SharedLoad<T>
    where
        Fut: Future<Output = CapabilityResult<T>> + Send + 'static,
    {
        let cache = Arc::clone(self);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let result = loader.await;
            cache.complete(&task_id, token, result)
        });

        let cache = Arc::clone(self);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    cache.abandon(&id, token);
                    Err(CapabilityError::ProviderUnavailable {
                        provider: id.kind.to_string(),
                        reason: format!("load task failed: {join_err}"),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Finishes a load: stores the value unless the load was superseded,
    /// or falls back to the last-known-good value on transient failure.
    fn complete(&self, id: &RecordId, token: u64, result: CapabilityResult<T>) -> CapabilityResult<T> {
        let mut state = self.state.lock();
        let registered = state
            .loads
            .get(id)
            .filter(|l| l.token == token)
            .map(|l| l.generation);
        if registered.is_some() {
            state.loads.remove(id);
        }
        let current = registered == Some(state.generation(id.kind));

        match result {
            Ok(value) => {
                if current {
                    let record = CachedRecord {
                        key: id.key.clone(),
                        kind: id.kind,
                        value: value.clone(),
                        fetched_at: Instant::now(),
                        dirty: false,
                        ttl: self.settings.ttl_for(id.kind),
                    };
                    state.insert(id.clone(), record, 0, self.settings.capacity);
                } else {
                    debug!(key = %id.key, kind = %id.kind, "Load superseded, result not cached");
                }
                Ok(value)
            }
            Err(err) if err.is_transient() => match state.slots.get(id) {
                Some(slot) => {
                    warn!(
                        key = %id.key,
                        kind = %id.kind,
                        error = %err,
                        "Re-fetch failed, serving last-known-good value"
                    );
                    let value = slot.record.value.clone();
                    state.stats.stale_served += 1;
                    Ok(value)
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    fn abandon(&self, id: &RecordId, token: u64) {
        let mut state = self.state.lock();
        if state.loads.get(id).is_some_and(|l| l.token == token) {
            state.loads.remove(id);
        }
    }

    /// Stores a locally written value as authoritative and dirty.
    ///
    /// `version` is the persistence write version; [`mark_clean`](Self::mark_clean)
    /// only clears the dirty flag for the matching version.
    pub fn put_local(&self, key: &EntityKey, kind: CapabilityKind, value: T, version: u64) {
        let id = RecordId::new(key.clone(), kind);
        let mut state = self.state.lock();
        if state.loads.remove(&id).is_some() {
            debug!(key = %key, kind = %kind, "Local write supersedes in-flight load");
        }
        let record = CachedRecord {
            key: key.clone(),
            kind,
            value,
            fetched_at: Instant::now(),
            dirty: true,
            ttl: self.settings.ttl_for(kind),
        };
        state.insert(id, record, version, self.settings.capacity);
    }

    /// Clears the dirty flag if the record still carries `version`.
    pub fn mark_clean(&self, key: &EntityKey, kind: CapabilityKind, version: u64) -> bool {
        let id = RecordId::new(key.clone(), kind);
        let mut state = self.state.lock();
        match state.slots.get_mut(&id) {
            Some(slot) if slot.version == version && slot.record.dirty => {
                slot.record.dirty = false;
                true
            }
            _ => false,
        }
    }

    /// Drops one record (and detaches its in-flight load, if any).
    pub fn invalidate(&self, key: &EntityKey, kind: CapabilityKind) -> bool {
        let id = RecordId::new(key.clone(), kind);
        let removed = self.state.lock().remove(&id);
        if removed {
            trace!(key = %key, kind = %kind, "Invalidated record");
        }
        removed
    }

    /// Drops every record of `kind`. Returns how many records were dropped.
    pub fn invalidate_all(&self, kind: CapabilityKind) -> usize {
        let mut state = self.state.lock();
        state.loads.retain(|id, _| id.kind != kind);
        *state.generations.entry(kind).or_default() += 1;

        let doomed: Vec<(u64, RecordId)> = state
            .slots
            .iter()
            .filter(|(id, _)| id.kind == kind)
            .map(|(id, slot)| (slot.tick, id.clone()))
            .collect();
        for (tick, id) in &doomed {
            state.recency.remove(tick);
            state.slots.remove(id);
        }
        debug!(kind = %kind, dropped = doomed.len(), "Invalidated capability kind");
        doomed.len()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Returns `true` when no records are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.slots.len(),
            dirty: state.slots.values().filter(|s| s.record.dirty).count(),
            in_flight: state.loads.len(),
            ..state.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn cache(capacity: usize, ttl: Duration) -> Arc<EntityCache<String>> {
        Arc::new(EntityCache::new(CacheSettings {
            capacity,
            default_ttl: ttl,
            ttl: HashMap::new(),
        }))
    }

    fn player(n: u128) -> EntityKey {
        EntityKey::new(uuid::Uuid::from_u128(n))
    }

    const KIND: CapabilityKind = CapabilityKind::Permissions;

    #[tokio::test]
    async fn test_concurrent_misses_share_one_load() {
        let cache = cache(16, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let lookups = (0..10).map(|_| {
            let calls = Arc::clone(&calls);
            let cache = Arc::clone(&cache);
            async move {
                cache
                    .get_or_load(&player(1), KIND, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok("admin".to_string())
                    })
                    .await
            }
        });
        let results = futures::future::join_all(lookups).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_deref().ok() == Some("admin")));
        assert_eq!(cache.stats().loads, 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = cache(16, Duration::from_secs(60));
        let failed = cache
            .get_or_load(&player(1), KIND, || async {
                Err(CapabilityError::ProviderError {
                    provider: "p".into(),
                    reason: "boom".into(),
                })
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.peek(&player(1), KIND).is_none());

        let value = cache
            .get_or_load(&player(1), KIND, || async { Ok("ok".to_string()) })
            .await;
        assert_eq!(value.as_deref().ok(), Some("ok"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache = cache(16, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let load = |calls: Arc<AtomicUsize>| {
            move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(format!("v{n}"))
            }
        };

        assert_eq!(cache.get_or_load(&player(1), KIND, load(Arc::clone(&calls))).await.unwrap(), "v0");
        assert_eq!(cache.get_or_load(&player(1), KIND, load(Arc::clone(&calls))).await.unwrap(), "v0");
        assert!(cache.invalidate(&player(1), KIND));
        assert_eq!(cache.get_or_load(&player(1), KIND, load(Arc::clone(&calls))).await.unwrap(), "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_records_are_refetched() {
        let cache = cache(16, Duration::from_secs(10));
        cache
            .get_or_load(&player(1), KIND, || async { Ok("old".to_string()) })
            .await
            .unwrap();
        assert_eq!(cache.get(&player(1), KIND).as_deref(), Some("old"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get(&player(1), KIND), None);

        let value = cache
            .get_or_load(&player(1), KIND, || async { Ok("new".to_string()) })
            .await;
        assert_eq!(value.as_deref().ok(), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_serves_last_known_good() {
        let cache = cache(16, Duration::from_secs(10));
        cache
            .get_or_load(&player(1), KIND, || async { Ok("cached".to_string()) })
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        let value = cache
            .get_or_load(&player(1), KIND, || async {
                Err(CapabilityError::persistence_unavailable("store down"))
            })
            .await;
        assert_eq!(value.as_deref().ok(), Some("cached"));
        assert_eq!(cache.stats().stale_served, 1);
        // Still expired, so the next access tries again.
        assert_eq!(cache.get(&player(1), KIND), None);
    }

    #[tokio::test]
    async fn test_eviction_prefers_clean_records() {
        let cache = cache(2, Duration::from_secs(60));
        cache.put_local(&player(1), KIND, "dirty".into(), 1);
        cache
            .get_or_load(&player(2), KIND, || async { Ok("clean".to_string()) })
            .await
            .unwrap();
        cache
            .get_or_load(&player(3), KIND, || async { Ok("newest".to_string()) })
            .await
            .unwrap();

        assert!(cache.peek(&player(1), KIND).is_some());
        assert!(cache.peek(&player(2), KIND).is_none());
        assert!(cache.peek(&player(3), KIND).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_invalidate_during_load_discards_result() {
        let cache = cache(16, Duration::from_secs(60));
        let (release, gate) = oneshot::channel::<()>();

        let pending = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_load(&player(1), KIND, move || async move {
                        let _ = gate.await;
                        Ok("stale".to_string())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(cache.stats().in_flight, 1);

        cache.invalidate(&player(1), KIND);
        let _ = release.send(());

        assert_eq!(pending.await.unwrap().as_deref().ok(), Some("stale"));
        assert!(cache.peek(&player(1), KIND).is_none());
    }

    #[tokio::test]
    async fn test_local_write_wins_over_in_flight_load() {
        let cache = cache(16, Duration::from_secs(60));
        let (release, gate) = oneshot::channel::<()>();

        let pending = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_load(&player(1), KIND, move || async move {
                        let _ = gate.await;
                        Ok("from provider".to_string())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        cache.put_local(&player(1), KIND, "local".into(), 7);
        let _ = release.send(());
        pending.await.unwrap().unwrap();

        let record = cache.peek(&player(1), KIND).unwrap();
        assert_eq!(record.value, "local");
        assert!(record.dirty);
    }

    #[test]
    fn test_mark_clean_matches_version() {
        let cache: EntityCache<String> = EntityCache::new(CacheSettings::default());
        cache.put_local(&player(1), KIND, "a".into(), 1);
        cache.put_local(&player(1), KIND, "b".into(), 2);

        assert!(!cache.mark_clean(&player(1), KIND, 1));
        assert!(cache.peek(&player(1), KIND).unwrap().dirty);
        assert!(cache.mark_clean(&player(1), KIND, 2));
        assert!(!cache.peek(&player(1), KIND).unwrap().dirty);
    }

    #[test]
    fn test_invalidate_all_is_scoped_to_kind() {
        let cache: EntityCache<String> = EntityCache::new(CacheSettings::default());
        cache.put_local(&player(1), CapabilityKind::Permissions, "p".into(), 1);
        cache.put_local(&player(2), CapabilityKind::Permissions, "p".into(), 2);
        cache.put_local(&player(1), CapabilityKind::MapMarker, "m".into(), 3);

        assert_eq!(cache.invalidate_all(CapabilityKind::Permissions), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.peek(&player(1), CapabilityKind::MapMarker).is_some());
    }

    #[tokio::test]
    async fn test_loader_is_built_outside_the_lock() {
        let cache = cache(16, Duration::from_secs(60));
        let unlocked = Arc::new(AtomicBool::new(false));

        let observed = Arc::clone(&unlocked);
        let inner = Arc::clone(&cache);
        let value = cache
            .get_or_load(&player(1), KIND, move || {
                observed.store(inner.state.try_lock().is_some(), Ordering::SeqCst);
                async { Ok("built".to_string()) }
            })
            .await;

        assert_eq!(value.as_deref().ok(), Some("built"));
        assert!(unlocked.load(Ordering::SeqCst));
        assert_eq!(cache.get(&player(1), KIND).as_deref(), Some("built"));
    }

    #[tokio::test]
    async fn test_load_from_previous_generation_is_not_cached() {
        let cache = cache(16, Duration::from_secs(60));
        let generation = cache.generation(KIND);
        cache.invalidate_all(KIND);
        assert_eq!(cache.generation(KIND), generation + 1);

        let value = cache
            .get_or_load_at(&player(1), KIND, generation, || async { Ok("old provider".to_string()) })
            .await;
        assert_eq!(value.as_deref().ok(), Some("old provider"));
        assert!(cache.peek(&player(1), KIND).is_none());
        assert_eq!(cache.stats().in_flight, 0);

        let value = cache
            .get_or_load(&player(1), KIND, || async { Ok("new provider".to_string()) })
            .await;
        assert_eq!(value.as_deref().ok(), Some("new provider"));
        assert_eq!(cache.get(&player(1), KIND).as_deref(), Some("new provider"));
    }

    #[tokio::test]
    async fn test_invalidate_all_during_load_discards_result() {
        let cache = cache(16, Duration::from_secs(60));
        let (release, gate) = oneshot::channel::<()>();

        let pending = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_load(&player(1), KIND, move || async move {
                        let _ = gate.await;
                        Ok("old provider".to_string())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        cache.invalidate_all(KIND);
        let _ = release.send(());

        assert!(pending.await.unwrap().is_ok());
        assert!(cache.peek(&player(1), KIND).is_none());
    }
}
