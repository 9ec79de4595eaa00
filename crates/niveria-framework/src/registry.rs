//! Capability registry: which provider backs each capability kind.
//!
//! The registry keeps one slot per [`CapabilityKind`]. Each slot holds every
//! registered provider for that kind and points at the active one:
//!
//! - the highest (effective) priority among available providers wins;
//! - equal priorities are settled by [`TieBreak`] and the decision is logged;
//! - providers whose availability predicate is false, or that are listed in
//!   [`RegistrySettings::disabled`], are kept but never activated.
//!
//! Registration, deregistration and [`refresh`](CapabilityRegistry::refresh)
//! are serialized by a registry-wide writer lock. Each kind has its own
//! `RwLock`, so re-pointing one kind never blocks resolution of another.
//! Whenever the active provider of a kind changes, every cached record of
//! that kind is invalidated before the call returns.
//!
//! # Example
//!
//! ```rust,ignore
//! registry.register(ProviderDescriptor::new("LuckPerms", perms).priority(10));
//! let handle = registry.resolve(CapabilityKind::Permissions)?;
//! let perms = registry.permissions()?;
//! ```

use std::array;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use niveria_core::{
    CapabilityError, CapabilityEvent, CapabilityKind, CapabilityProvider, CapabilityResult,
    LandClaimProvider, MapMarkerProvider, PermissionProvider, ProfileProvider, ProviderHandle, Value,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::cache::EntityCache;
use crate::descriptor::{NIVERIA_PROVIDER_API_VERSION, ProviderDescriptor};

// =============================================================================
// Settings
// =============================================================================

/// How equal priorities are settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// First registered wins.
    #[default]
    Registration,
    /// Lexicographically smallest provider name wins (deterministic when
    /// providers load in parallel).
    Name,
}

impl TieBreak {
    fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration order",
            Self::Name => "provider name",
        }
    }
}

/// Operator-controlled registry behaviour.
#[derive(Debug, Clone, Default)]
pub struct RegistrySettings {
    /// Rule for equal priorities.
    pub tie_break: TieBreak,
    /// Provider names that are registered but never activated.
    pub disabled: HashSet<String>,
    /// Priority overrides by provider name.
    pub priority_overrides: HashMap<String, i32>,
}

// =============================================================================
// Slots
// =============================================================================

struct Entry {
    descriptor: ProviderDescriptor,
    priority: i32,
    seq: u64,
    available: bool,
}

impl Entry {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn outranks(&self, other: &Entry, tie_break: TieBreak) -> bool {
        match self.priority.cmp(&other.priority) {
            CmpOrdering::Greater => true,
            CmpOrdering::Less => false,
            CmpOrdering::Equal => match tie_break {
                TieBreak::Registration => self.seq < other.seq,
                TieBreak::Name => self.name() < other.name(),
            },
        }
    }
}

#[derive(Default)]
struct KindSlot {
    entries: Vec<Entry>,
    active: Option<usize>,
}

impl KindSlot {
    fn active_name(&self) -> Option<String> {
        self.active.map(|i| self.entries[i].name().to_string())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name() == name)
    }

    fn handle(&self, index: usize, kind: CapabilityKind) -> ProviderHandle {
        let entry = &self.entries[index];
        ProviderHandle {
            kind,
            name: entry.name().to_string(),
            priority: entry.priority,
            active: self.active == Some(index),
        }
    }

    /// Re-picks the active provider. Returns `(previous, current)` names.
    fn reselect(&mut self, kind: CapabilityKind, tie_break: TieBreak) -> (Option<String>, Option<String>) {
        let previous = self.active_name();

        let mut best: Option<usize> = None;
        for (i, entry) in self.entries.iter().enumerate().filter(|(_, e)| e.available) {
            best = match best {
                Some(b) if !entry.outranks(&self.entries[b], tie_break) => Some(b),
                _ => Some(i),
            };
        }
        self.active = best;

        if let Some(winner) = best {
            let chosen = &self.entries[winner];
            let rivals: Vec<&str> = self
                .entries
                .iter()
                .enumerate()
                .filter(|(i, e)| *i != winner && e.available && e.priority == chosen.priority)
                .map(|(_, e)| e.name())
                .collect();
            if !rivals.is_empty() {
                info!(
                    kind = %kind,
                    chosen = %chosen.name(),
                    over = ?rivals,
                    priority = chosen.priority,
                    rule = tie_break.as_str(),
                    "Equal provider priorities, tie broken"
                );
            }
        }

        (previous, self.active_name())
    }
}

// =============================================================================
// CapabilityRegistry
// =============================================================================

/// The capability registry. Shared as `Arc<CapabilityRegistry>`.
pub struct CapabilityRegistry {
    settings: RegistrySettings,
    writer: Mutex<()>,
    slots: [RwLock<KindSlot>; CapabilityKind::ALL.len()],
    seq: AtomicU64,
    cache: Arc<EntityCache<Value>>,
    bus: Arc<EventBus>,
}

impl CapabilityRegistry {
    /// Creates an empty registry that invalidates `cache` and reports on `bus`.
    pub fn new(settings: RegistrySettings, cache: Arc<EntityCache<Value>>, bus: Arc<EventBus>) -> Self {
        Self {
            settings,
            writer: Mutex::new(()),
            slots: array::from_fn(|_| RwLock::new(KindSlot::default())),
            seq: AtomicU64::new(0),
            cache,
            bus,
        }
    }

    fn slot(&self, kind: CapabilityKind) -> &RwLock<KindSlot> {
        &self.slots[kind as usize]
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers a provider and returns its handle.
    ///
    /// Idempotent per `(kind, name)`: registering the same pair again leaves
    /// the registry unchanged and returns the existing handle.
    pub fn register(&self, descriptor: ProviderDescriptor) -> ProviderHandle {
        let _writer = self.writer.lock();
        let kind = descriptor.kind();
        let name = descriptor.name.clone();

        if !descriptor.is_compatible() {
            warn!(
                provider = %name,
                descriptor_version = %format!("{}.{}", descriptor.api_version >> 16, descriptor.api_version & 0xFFFF),
                host_version = %format!(
                    "{}.{}",
                    NIVERIA_PROVIDER_API_VERSION >> 16,
                    NIVERIA_PROVIDER_API_VERSION & 0xFFFF
                ),
                "Provider API version mismatch, registering anyway"
            );
        }

        let mut events = Vec::new();
        let handle = {
            let mut slot = self.slot(kind).write();
            if let Some(existing) = slot.position(&name) {
                debug!(kind = %kind, provider = %name, "Provider already registered");
                return slot.handle(existing, kind);
            }

            let priority = self
                .settings
                .priority_overrides
                .get(&name)
                .copied()
                .unwrap_or(descriptor.priority);
            let available = self.evaluate(&descriptor);
            slot.entries.push(Entry {
                descriptor,
                priority,
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                available,
            });
            let index = slot.entries.len() - 1;
            info!(kind = %kind, provider = %name, priority, available, "Provider registered");
            events.push(CapabilityEvent::ProviderLoaded {
                kind,
                name: name.clone(),
            });

            let (previous, current) = slot.reselect(kind, self.settings.tie_break);
            if previous != current {
                self.switch_active(kind, previous, current, &mut events);
            }
            slot.handle(index, kind)
        };

        for event in events {
            self.bus.publish(event);
        }
        handle
    }

    /// Removes the named provider from every kind it backs.
    ///
    /// Cached records of each affected kind are invalidated before this
    /// returns. Returns `false` if no provider had that name.
    pub fn deregister(&self, name: &str) -> bool {
        let _writer = self.writer.lock();
        let mut events = Vec::new();
        let mut removed = false;

        for kind in CapabilityKind::ALL {
            let mut slot = self.slot(kind).write();
            let Some(index) = slot.position(name) else {
                continue;
            };
            let previous = slot.active_name();
            slot.entries.remove(index);
            slot.active = None;
            let (_, current) = slot.reselect(kind, self.settings.tie_break);
            removed = true;

            info!(kind = %kind, provider = %name, "Provider deregistered");
            events.push(CapabilityEvent::ProviderUnloaded {
                kind,
                name: name.to_string(),
            });
            if previous != current {
                self.switch_active(kind, previous, current, &mut events);
            } else {
                let dropped = self.cache.invalidate_all(kind);
                debug!(kind = %kind, dropped, "Cache cleared after provider unload");
                events.push(CapabilityEvent::KindInvalidated { kind });
            }
        }

        for event in events {
            self.bus.publish(event);
        }
        removed
    }

    /// Re-evaluates every availability predicate and re-picks the active
    /// provider per kind. Returns the kinds whose active provider changed.
    pub fn refresh(&self) -> Vec<CapabilityKind> {
        let _writer = self.writer.lock();
        let mut events = Vec::new();
        let mut changed = Vec::new();

        for kind in CapabilityKind::ALL {
            let mut slot = self.slot(kind).write();
            for i in 0..slot.entries.len() {
                let available = self.evaluate(&slot.entries[i].descriptor);
                let entry = &mut slot.entries[i];
                if entry.available != available {
                    entry.available = available;
                    if available {
                        info!(kind = %kind, provider = %entry.name(), "Provider became available");
                    }
                }
            }
            let (previous, current) = slot.reselect(kind, self.settings.tie_break);
            if previous != current {
                self.switch_active(kind, previous, current, &mut events);
                changed.push(kind);
            }
        }

        for event in events {
            self.bus.publish(event);
        }
        changed
    }

    fn evaluate(&self, descriptor: &ProviderDescriptor) -> bool {
        if self.settings.disabled.contains(&descriptor.name) {
            info!(provider = %descriptor.name, "Provider disabled by configuration");
            return false;
        }
        let available = descriptor.is_available();
        if !available {
            warn!(provider = %descriptor.name, kind = %descriptor.kind(), "{} not found, disabling", descriptor.name);
        }
        available
    }

    /// Invalidates the kind's cache while the caller holds its slot lock.
    fn switch_active(
        &self,
        kind: CapabilityKind,
        previous: Option<String>,
        current: Option<String>,
        events: &mut Vec<CapabilityEvent>,
    ) {
        let dropped = self.cache.invalidate_all(kind);
        match &current {
            Some(name) => info!(kind = %kind, previous = ?previous, current = %name, dropped, "Active provider changed"),
            None => warn!(kind = %kind, previous = ?previous, dropped, "No provider left, capability unavailable"),
        }
        events.push(CapabilityEvent::ActiveProviderChanged {
            kind,
            previous,
            current,
        });
        events.push(CapabilityEvent::KindInvalidated { kind });
    }

    // ─── Resolution ──────────────────────────────────────────────────────────

    /// Handle of the provider backing `kind`.
    pub fn resolve(&self, kind: CapabilityKind) -> CapabilityResult<ProviderHandle> {
        let slot = self.slot(kind).read();
        slot.active
            .map(|i| slot.handle(i, kind))
            .ok_or_else(|| CapabilityError::not_available(kind))
    }

    /// Adapter backing `kind`.
    pub fn provider(&self, kind: CapabilityKind) -> CapabilityResult<CapabilityProvider> {
        let slot = self.slot(kind).read();
        slot.active
            .map(|i| slot.entries[i].descriptor.provider.clone())
            .ok_or_else(|| CapabilityError::not_available(kind))
    }

    /// Every registered handle for `kind`, best-ranked first.
    pub fn handles(&self, kind: CapabilityKind) -> Vec<ProviderHandle> {
        let slot = self.slot(kind).read();
        let mut order: Vec<usize> = (0..slot.entries.len()).collect();
        order.sort_by(|a, b| {
            let (ea, eb) = (&slot.entries[*a], &slot.entries[*b]);
            if ea.outranks(eb, self.settings.tie_break) {
                CmpOrdering::Less
            } else if eb.outranks(ea, self.settings.tie_break) {
                CmpOrdering::Greater
            } else {
                CmpOrdering::Equal
            }
        });
        order.into_iter().map(|i| slot.handle(i, kind)).collect()
    }

    /// Name of the active provider per kind (kinds without one are omitted).
    pub fn active_providers(&self) -> Vec<(CapabilityKind, String)> {
        CapabilityKind::ALL
            .into_iter()
            .filter_map(|kind| self.slot(kind).read().active_name().map(|name| (kind, name)))
            .collect()
    }

    // ─── Typed accessors ─────────────────────────────────────────────────────

    /// Active permission engine.
    pub fn permissions(&self) -> CapabilityResult<Arc<dyn PermissionProvider>> {
        self.provider(CapabilityKind::Permissions)?
            .as_permissions()
            .ok_or_else(|| CapabilityError::not_available(CapabilityKind::Permissions))
    }

    /// Active land-claim system.
    pub fn land_claims(&self) -> CapabilityResult<Arc<dyn LandClaimProvider>> {
        self.provider(CapabilityKind::LandClaim)?
            .as_land_claim()
            .ok_or_else(|| CapabilityError::not_available(CapabilityKind::LandClaim))
    }

    /// Active web-map renderer.
    pub fn map_markers(&self) -> CapabilityResult<Arc<dyn MapMarkerProvider>> {
        self.provider(CapabilityKind::MapMarker)?
            .as_map_marker()
            .ok_or_else(|| CapabilityError::not_available(CapabilityKind::MapMarker))
    }

    /// Active profile store.
    pub fn profiles(&self) -> CapabilityResult<Arc<dyn ProfileProvider>> {
        self.provider(CapabilityKind::ProfileStore)?
            .as_profile_store()
            .ok_or_else(|| CapabilityError::not_available(CapabilityKind::ProfileStore))
    }
}
