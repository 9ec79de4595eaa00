//! The downstream-plugin API.
//!
//! [`CapabilityContext`] owns every moving part (registry, cache, gateway,
//! bus, worker pool, sessions) and is passed explicitly to whoever needs it;
//! there is no global instance.
//!
//! | Call | Route |
//! |------|-------|
//! | `get` | cache → (miss) adapter `fetch` → (no record) persisted snapshot |
//! | `set` | adapter `store` → commit (cache + event + queued write) |
//! | `has_permission` | cached snapshot → (node absent) adapter |
//! | `claim_at` | cache per block → (miss) adapter |
//! | `has_claim_flag` | adapter |
//! | `upsert_marker` | adapter → commit |
//!
//! A commit runs under the bus ordering lock: the cache update, the
//! `RecordUpdated` event and the queued write share one version, and
//! listeners observe commits in order. Top-level fields dropped by a commit
//! are queued as removals so the store forgets them too.
//!
//! # Example
//!
//! ```rust,ignore
//! let ctx = CapabilityContext::builder().store(Arc::new(MemoryStore::new())).build();
//! ctx.register_builtin_profiles(BuiltinProfiles::new());
//!
//! ctx.player_joined(&player, "127.0.0.1".parse()?).await?;
//! ctx.set_field(&player, CapabilityKind::ProfileStore, "stats.kills", &3).await?;
//! let kills: Option<u32> = ctx.get_field(&player, CapabilityKind::ProfileStore, "stats.kills").await?;
//! ```

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use niveria_core::{
    CapabilityError, CapabilityEvent, CapabilityKind, CapabilityProvider, CapabilityResult,
    ChangeOrigin, ClaimInfo, DocumentStore, EntityKey, Location, MapVisibility, Marker,
    PermissionSnapshot, ProviderHandle, Value, get_path, remove_path, set_path,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::builtin::BuiltinProfiles;
use crate::bus::{CapabilityListener, Delivery, EventBus, SubscriptionId};
use crate::cache::{CacheSettings, CacheStats, EntityCache};
use crate::persistence::{FailedWrite, PersistenceGateway, PersistenceSettings, QueueStats};
use crate::pool::{PoolSettings, WorkerPool};
use crate::registry::{CapabilityRegistry, RegistrySettings};
use crate::session::SessionTracker;
use crate::store::MemoryStore;

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`CapabilityContext`].
#[derive(Default)]
pub struct CapabilityContextBuilder {
    store: Option<Arc<dyn DocumentStore>>,
    cache: CacheSettings,
    persistence: PersistenceSettings,
    registry: RegistrySettings,
    pool: PoolSettings,
}

impl CapabilityContextBuilder {
    /// Sets the document store (defaults to a [`MemoryStore`]).
    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets cache capacity and TTLs.
    pub fn cache(mut self, settings: CacheSettings) -> Self {
        self.cache = settings;
        self
    }

    /// Sets batching, timeout and retry settings.
    pub fn persistence(mut self, settings: PersistenceSettings) -> Self {
        self.persistence = settings;
        self
    }

    /// Sets tie-break, disabled providers and priority overrides.
    pub fn registry(mut self, settings: RegistrySettings) -> Self {
        self.registry = settings;
        self
    }

    /// Sets provider-call concurrency and timeout.
    pub fn pool(mut self, settings: PoolSettings) -> Self {
        self.pool = settings;
        self
    }

    /// Wires everything together.
    pub fn build(self) -> Arc<CapabilityContext> {
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let bus = Arc::new(EventBus::new());
        let cache = Arc::new(EntityCache::new(self.cache));
        let gateway = Arc::new(PersistenceGateway::new(store, self.persistence, Arc::clone(&bus)));
        let registry = Arc::new(CapabilityRegistry::new(self.registry, Arc::clone(&cache), Arc::clone(&bus)));

        let invalidated = Arc::clone(&cache);
        let invalidator = bus.subscribe(Delivery::Inline, move |event: &CapabilityEvent| match event {
            CapabilityEvent::ExternalChange { key, kind } => {
                invalidated.invalidate(key, *kind);
            }
            CapabilityEvent::WriteAcknowledged { key, kind, version } => {
                invalidated.mark_clean(key, *kind, *version);
            }
            _ => {}
        });

        Arc::new(CapabilityContext {
            registry,
            cache,
            gateway,
            bus,
            pool: WorkerPool::new(&self.pool),
            sessions: SessionTracker::new(),
            invalidator,
        })
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Operator snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextStats {
    /// Cache counters.
    pub cache: CacheStats,
    /// Write queue depths.
    pub queue: QueueStats,
    /// Active provider per kind.
    pub active_providers: Vec<(CapabilityKind, String)>,
    /// Open player sessions.
    pub sessions: usize,
}

// =============================================================================
// CapabilityContext
// =============================================================================

/// The capability layer. Shared as `Arc<CapabilityContext>`.
pub struct CapabilityContext {
    registry: Arc<CapabilityRegistry>,
    cache: Arc<EntityCache<Value>>,
    gateway: Arc<PersistenceGateway>,
    bus: Arc<EventBus>,
    pool: WorkerPool,
    sessions: SessionTracker,
    invalidator: SubscriptionId,
}

impl CapabilityContext {
    /// Starts a builder.
    pub fn builder() -> CapabilityContextBuilder {
        CapabilityContextBuilder::default()
    }

    /// The provider registry.
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// The entity cache.
    pub fn cache(&self) -> &Arc<EntityCache<Value>> {
        &self.cache
    }

    /// The persistence gateway.
    pub fn gateway(&self) -> &Arc<PersistenceGateway> {
        &self.gateway
    }

    /// The event bus.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Player sessions.
    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    /// Subscription id of the cache invalidation listener.
    pub fn invalidator(&self) -> SubscriptionId {
        self.invalidator
    }

    /// Registers the persistence-backed profile provider at the lowest priority.
    pub fn register_builtin_profiles(&self, profiles: BuiltinProfiles) -> ProviderHandle {
        self.registry.register(profiles.descriptor())
    }

    // ─── Generic records ─────────────────────────────────────────────────────

    /// Raw record for `(key, kind)`; `None` when neither the provider nor
    /// the store has one.
    pub async fn get_value(&self, key: &EntityKey, kind: CapabilityKind) -> CapabilityResult<Option<Value>> {
        let generation = self.cache.generation(kind);
        let provider = self.registry.provider(kind)?;
        let pool = self.pool.clone();
        let gateway = Arc::clone(&self.gateway);
        let owned = key.clone();

        let value = self
            .cache
            .get_or_load_at(key, kind, generation, move || load_record(provider, pool, gateway, owned, kind))
            .await?;
        Ok((!value.is_null()).then_some(value))
    }

    /// Typed record for `(key, kind)`.
    pub async fn get<T: DeserializeOwned>(&self, key: &EntityKey, kind: CapabilityKind) -> CapabilityResult<Option<T>> {
        self.get_value(key, kind).await?.map(decode).transpose()
    }

    /// Like [`get`](Self::get), abandoned with [`CapabilityError::Cancelled`]
    /// once `token` is cancelled. The shared load keeps running for other
    /// waiters and still populates the cache.
    pub async fn get_with<T: DeserializeOwned>(
        &self,
        key: &EntityKey,
        kind: CapabilityKind,
        token: &CancellationToken,
    ) -> CapabilityResult<Option<T>> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                trace!(key = %key, kind = %kind, "Caller gone, result discarded");
                Err(CapabilityError::Cancelled)
            }
            result = self.get(key, kind) => result,
        }
    }

    /// Sets a record: mirrors it to the provider, then commits it locally.
    ///
    /// Returns once the cache is authoritative; persistence happens in the
    /// background.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &EntityKey, kind: CapabilityKind, value: &T) -> CapabilityResult<()> {
        let payload = serde_json::to_value(value)?;
        self.store_in_provider(key, kind, &payload).await?;
        self.commit_local(key, kind, payload);
        Ok(())
    }

    /// Like [`set`](Self::set), but waits for the store to acknowledge the
    /// write. Fails with [`CapabilityError::DurableWriteFailed`] when the
    /// write exhausts its retries.
    pub async fn set_durable<T: Serialize + ?Sized>(
        &self,
        key: &EntityKey,
        kind: CapabilityKind,
        value: &T,
    ) -> CapabilityResult<()> {
        let payload = serde_json::to_value(value)?;
        self.store_in_provider(key, kind, &payload).await?;

        let outcome = self.bus.commit(|events| {
            let removed = self.removed_fields(key, kind, &payload);
            let (version, outcome) = self.gateway.enqueue_durable(key.clone(), kind, payload.clone(), removed);
            self.cache.put_local(key, kind, payload, version);
            events.push(CapabilityEvent::RecordUpdated {
                key: key.clone(),
                kind,
                origin: ChangeOrigin::Local,
            });
            outcome
        });
        outcome.await.map_err(|_| CapabilityError::Cancelled)?
    }

    /// Reads a nested field (`"a.b.c"`) of a record.
    pub async fn get_field<T: DeserializeOwned>(
        &self,
        key: &EntityKey,
        kind: CapabilityKind,
        path: &str,
    ) -> CapabilityResult<Option<T>> {
        let Some(record) = self.get_value(key, kind).await? else {
            return Ok(None);
        };
        get_path(&record, path).cloned().map(decode).transpose()
    }

    /// Updates a nested field of a record, creating intermediate objects.
    pub async fn set_field<T: Serialize + ?Sized>(
        &self,
        key: &EntityKey,
        kind: CapabilityKind,
        path: &str,
        value: &T,
    ) -> CapabilityResult<()> {
        let field = serde_json::to_value(value)?;
        let mut record = self
            .get_value(key, kind)
            .await?
            .unwrap_or_else(|| Value::Object(Default::default()));
        set_path(&mut record, path, field);
        self.set(key, kind, &record).await
    }

    /// Removes a nested field of a record. Returns `false` when the field
    /// did not exist.
    pub async fn remove_field(&self, key: &EntityKey, kind: CapabilityKind, path: &str) -> CapabilityResult<bool> {
        let Some(mut record) = self.get_value(key, kind).await? else {
            return Ok(false);
        };
        if remove_path(&mut record, path).is_none() {
            return Ok(false);
        }
        self.set(key, kind, &record).await?;
        Ok(true)
    }

    /// Drops one cached record.
    pub fn invalidate(&self, key: &EntityKey, kind: CapabilityKind) {
        self.bus.commit(|events| {
            self.cache.invalidate(key, kind);
            events.push(CapabilityEvent::RecordInvalidated { key: key.clone(), kind });
        });
    }

    /// Drops every cached record of `kind`.
    pub fn invalidate_all(&self, kind: CapabilityKind) {
        self.bus.commit(|events| {
            self.cache.invalidate_all(kind);
            events.push(CapabilityEvent::KindInvalidated { kind });
        });
    }

    /// Reports a provider-side change (e.g. a recalculated permission user).
    /// The cache invalidator drops the record and listeners are notified.
    pub fn notify_changed(&self, key: &EntityKey, kind: CapabilityKind) {
        debug!(key = %key, kind = %kind, "Provider reported a change");
        self.bus.publish(CapabilityEvent::ExternalChange { key: key.clone(), kind });
    }

    async fn store_in_provider(&self, key: &EntityKey, kind: CapabilityKind, payload: &Value) -> CapabilityResult<()> {
        let provider = self.registry.provider(kind)?;
        self.pool.run(provider.name(), provider.store(key, payload)).await
    }

    fn commit_local(&self, key: &EntityKey, kind: CapabilityKind, payload: Value) -> u64 {
        self.bus.commit(|events| {
            let removed = self.removed_fields(key, kind, &payload);
            let version = self.gateway.enqueue_update(key.clone(), kind, payload.clone(), removed);
            self.cache.put_local(key, kind, payload, version);
            events.push(CapabilityEvent::RecordUpdated {
                key: key.clone(),
                kind,
                origin: ChangeOrigin::Local,
            });
            version
        })
    }

    /// Top-level fields of the cached record that `next` no longer has.
    fn removed_fields(&self, key: &EntityKey, kind: CapabilityKind, next: &Value) -> BTreeSet<String> {
        let Some(previous) = self.cache.peek(key, kind) else {
            return BTreeSet::new();
        };
        match (previous.value, next) {
            (Value::Object(before), Value::Object(after)) => {
                before.into_iter().map(|(field, _)| field).filter(|f| !after.contains_key(f)).collect()
            }
            _ => BTreeSet::new(),
        }
    }

    // ─── Permissions ─────────────────────────────────────────────────────────

    /// Cached permission snapshot of a player.
    pub async fn permission_snapshot(&self, key: &EntityKey) -> CapabilityResult<Option<PermissionSnapshot>> {
        self.get(key, CapabilityKind::Permissions).await
    }

    /// Checks a permission node: answered from the cached snapshot when the
    /// node is present there, otherwise by the permission engine.
    pub async fn has_permission(&self, key: &EntityKey, node: &str) -> CapabilityResult<bool> {
        let permissions = self.registry.permissions()?;
        if let Some(snapshot) = self.permission_snapshot(key).await?
            && let Some(granted) = snapshot.check(node)
        {
            return Ok(granted);
        }
        self.pool
            .run(permissions.name(), permissions.has_permission(key, node))
            .await
    }

    /// Parses a meta value of a player.
    pub async fn meta<T: FromStr>(&self, key: &EntityKey, meta_key: &str) -> CapabilityResult<Option<T>> {
        match self.permission_snapshot(key).await? {
            Some(snapshot) => snapshot.meta::<T>(meta_key).map_err(CapabilityError::Serialization),
            None => Ok(None),
        }
    }

    // ─── Land claims ─────────────────────────────────────────────────────────

    /// Claim covering `location`, cached per block.
    pub async fn claim_at(&self, location: &Location) -> CapabilityResult<Option<ClaimInfo>> {
        let generation = self.cache.generation(CapabilityKind::LandClaim);
        let claims = self.registry.land_claims()?;
        let pool = self.pool.clone();
        let owned = location.clone();
        let block = location.block_key();

        let value = self
            .cache
            .get_or_load_at(&block, CapabilityKind::LandClaim, generation, move || async move {
                let claim = pool.run(claims.name(), claims.claim_at(&owned)).await?;
                Ok(serde_json::to_value(claim)?)
            })
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        decode(value).map(Some)
    }

    /// Owner of the claim covering `location`.
    pub async fn owner_of(&self, location: &Location) -> CapabilityResult<Option<EntityKey>> {
        Ok(self.claim_at(location).await?.and_then(|claim| claim.owner))
    }

    /// Evaluates a claim flag. Always asked of the provider, which also
    /// decides what unclaimed land allows.
    pub async fn has_claim_flag(
        &self,
        location: &Location,
        actor: Option<&EntityKey>,
        flag: &str,
    ) -> CapabilityResult<bool> {
        let claims = self.registry.land_claims()?;
        self.pool
            .run(claims.name(), claims.has_flag(location, actor, flag))
            .await
    }

    // ─── Map markers ─────────────────────────────────────────────────────────

    /// Creates or replaces a marker.
    pub async fn upsert_marker(&self, marker: &Marker) -> CapabilityResult<()> {
        let maps = self.registry.map_markers()?;
        self.pool.run(maps.name(), maps.upsert_marker(marker)).await?;
        self.commit_local(&marker.key(), CapabilityKind::MapMarker, serde_json::to_value(marker)?);
        Ok(())
    }

    /// Removes a marker.
    pub async fn remove_marker(&self, marker_id: &str) -> CapabilityResult<()> {
        let maps = self.registry.map_markers()?;
        self.pool.run(maps.name(), maps.remove_marker(marker_id)).await?;
        self.commit_local(&EntityKey::marker(marker_id), CapabilityKind::MapMarker, Value::Null);
        Ok(())
    }

    /// Last committed state of a marker.
    pub async fn marker(&self, marker_id: &str) -> CapabilityResult<Option<Marker>> {
        self.get(&EntityKey::marker(marker_id), CapabilityKind::MapMarker).await
    }

    /// Hides or shows a player on the map.
    pub async fn set_hidden(&self, key: &EntityKey, hidden: bool) -> CapabilityResult<()> {
        let maps = self.registry.map_markers()?;
        self.pool.run(maps.name(), maps.set_hidden(key, hidden)).await?;
        self.commit_local(key, CapabilityKind::MapMarker, serde_json::to_value(MapVisibility { hidden })?);
        Ok(())
    }

    // ─── Profiles & sessions ─────────────────────────────────────────────────

    /// Handles a player join: opens their session and creates or touches
    /// their profile document.
    ///
    /// New profiles start from the provider's default document with `ip`,
    /// `first_join` and `last_join` (epoch millis) filled in; known ones only
    /// get `last_join` updated. The session token is returned even when the
    /// session was already open.
    pub async fn player_joined(&self, key: &EntityKey, address: IpAddr) -> CapabilityResult<CancellationToken> {
        let token = self.sessions.open(key);
        let profiles = self.registry.profiles()?;
        let now = Utc::now().timestamp_millis();

        let profile = match self.get_value(key, CapabilityKind::ProfileStore).await? {
            Some(mut existing) => {
                set_path(&mut existing, "last_join", json!(now));
                existing
            }
            None => {
                let mut fresh = profiles.default_profile(key);
                set_path(&mut fresh, "ip", json!(address.to_string()));
                set_path(&mut fresh, "first_join", json!(now));
                set_path(&mut fresh, "last_join", json!(now));
                debug!(key = %key, "Created default profile");
                fresh
            }
        };
        self.set(key, CapabilityKind::ProfileStore, &profile).await?;
        Ok(token)
    }

    /// Handles a player leaving: cancels their session so lookups made on
    /// their behalf are abandoned.
    pub fn player_left(&self, key: &EntityKey) -> bool {
        self.sessions.close(key)
    }

    /// Session token of an online player.
    pub fn session(&self, key: &EntityKey) -> Option<CancellationToken> {
        self.sessions.token(key)
    }

    // ─── Events ──────────────────────────────────────────────────────────────

    /// Subscribes a listener to capability-change events.
    pub fn subscribe<L: CapabilityListener>(&self, delivery: Delivery, listener: L) -> SubscriptionId {
        self.bus.subscribe(delivery, listener)
    }

    /// Removes a listener.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Channel of every event published from now on.
    pub fn stream(&self) -> (SubscriptionId, tokio::sync::mpsc::UnboundedReceiver<CapabilityEvent>) {
        self.bus.stream()
    }

    // ─── Operator surface ────────────────────────────────────────────────────

    /// Store round-trip time.
    pub async fn ping_store(&self) -> CapabilityResult<Duration> {
        self.gateway.ping().await
    }

    /// Writes parked after exhausting their retries.
    pub fn failed_writes(&self) -> Vec<FailedWrite> {
        self.gateway.failed_writes()
    }

    /// Re-queues parked writes immediately.
    pub fn retry_failed(&self) -> usize {
        self.gateway.retry_failed()
    }

    /// Cache, queue, provider and session counters.
    pub fn stats(&self) -> ContextStats {
        ContextStats {
            cache: self.cache.stats(),
            queue: self.gateway.queue_stats(),
            active_providers: self.registry.active_providers(),
            sessions: self.sessions.len(),
        }
    }
}

/// Loader behind every generic cache miss: adapter first, then the
/// persisted snapshot, then an explicit empty record.
async fn load_record(
    provider: CapabilityProvider,
    pool: WorkerPool,
    gateway: Arc<PersistenceGateway>,
    key: EntityKey,
    kind: CapabilityKind,
) -> CapabilityResult<Value> {
    if let Some(value) = pool.run(provider.name(), provider.fetch(&key)).await? {
        return Ok(value);
    }
    trace!(key = %key, kind = %kind, provider = %provider.name(), "No provider record, loading snapshot");
    Ok(gateway.load_snapshot(&key, kind).await?.unwrap_or(Value::Null))
}

fn decode<T: DeserializeOwned>(value: Value) -> CapabilityResult<T> {
    serde_json::from_value(value).map_err(CapabilityError::from)
}
