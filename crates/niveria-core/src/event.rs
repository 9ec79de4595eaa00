//! Capability-change events.
//!
//! Events are published in the order their change was committed to the
//! cache. Persistence outcomes (`WriteAcknowledged`, `DurableWriteFailed`)
//! are published whenever the store answers, so they interleave freely
//! with cache commits.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityKind;
use crate::key::EntityKey;

/// Where a record change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// A downstream plugin wrote through this process.
    Local,
    /// The provider reported a change made elsewhere.
    Provider,
}

/// A change observed by the capability layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CapabilityEvent {
    /// A record was committed to the cache.
    RecordUpdated {
        /// Entity whose record changed.
        key: EntityKey,
        /// Capability of the record.
        kind: CapabilityKind,
        /// Who made the change.
        origin: ChangeOrigin,
    },
    /// A single record was dropped from the cache.
    RecordInvalidated {
        /// Entity whose record was dropped.
        key: EntityKey,
        /// Capability of the record.
        kind: CapabilityKind,
    },
    /// Every record of a kind was dropped from the cache.
    KindInvalidated {
        /// The affected capability.
        kind: CapabilityKind,
    },
    /// A provider reported that its data for an entity changed.
    ExternalChange {
        /// Entity whose data changed.
        key: EntityKey,
        /// Capability that changed.
        kind: CapabilityKind,
    },
    /// A provider was registered.
    ProviderLoaded {
        /// Capability it backs.
        kind: CapabilityKind,
        /// Provider name.
        name: String,
    },
    /// A provider was deregistered.
    ProviderUnloaded {
        /// Capability it backed.
        kind: CapabilityKind,
        /// Provider name.
        name: String,
    },
    /// The provider backing a kind changed.
    ActiveProviderChanged {
        /// The affected capability.
        kind: CapabilityKind,
        /// Provider that was active before, if any.
        previous: Option<String>,
        /// Provider that is active now, if any.
        current: Option<String>,
    },
    /// The store confirmed a queued write.
    WriteAcknowledged {
        /// Entity the write belonged to.
        key: EntityKey,
        /// Capability the write belonged to.
        kind: CapabilityKind,
        /// Gateway-assigned write version.
        version: u64,
    },
    /// A queued write exhausted its retries and was parked.
    DurableWriteFailed {
        /// Entity the write belonged to.
        key: EntityKey,
        /// Capability the write belonged to.
        kind: CapabilityKind,
        /// Attempts made.
        attempts: u32,
        /// Last failure reason.
        reason: String,
    },
}

impl CapabilityEvent {
    /// Short event name for logs.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RecordUpdated { .. } => "record_updated",
            Self::RecordInvalidated { .. } => "record_invalidated",
            Self::KindInvalidated { .. } => "kind_invalidated",
            Self::ExternalChange { .. } => "external_change",
            Self::ProviderLoaded { .. } => "provider_loaded",
            Self::ProviderUnloaded { .. } => "provider_unloaded",
            Self::ActiveProviderChanged { .. } => "active_provider_changed",
            Self::WriteAcknowledged { .. } => "write_acknowledged",
            Self::DurableWriteFailed { .. } => "durable_write_failed",
        }
    }

    /// The capability this event concerns.
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::RecordUpdated { kind, .. }
            | Self::RecordInvalidated { kind, .. }
            | Self::KindInvalidated { kind }
            | Self::ExternalChange { kind, .. }
            | Self::ProviderLoaded { kind, .. }
            | Self::ProviderUnloaded { kind, .. }
            | Self::ActiveProviderChanged { kind, .. }
            | Self::WriteAcknowledged { kind, .. }
            | Self::DurableWriteFailed { kind, .. } => *kind,
        }
    }

    /// The entity this event concerns, for per-record events.
    pub fn key(&self) -> Option<&EntityKey> {
        match self {
            Self::RecordUpdated { key, .. }
            | Self::RecordInvalidated { key, .. }
            | Self::ExternalChange { key, .. }
            | Self::WriteAcknowledged { key, .. }
            | Self::DurableWriteFailed { key, .. } => Some(key),
            _ => None,
        }
    }
}

impl fmt::Display for CapabilityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key() {
            Some(key) => write!(f, "{}({}, {key})", self.event_name(), self.kind()),
            None => write!(f, "{}({})", self.event_name(), self.kind()),
        }
    }
}
