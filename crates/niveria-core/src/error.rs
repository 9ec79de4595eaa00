//! Error taxonomy shared by every Niveria layer.
//!
//! Three levels, from the outside in:
//!
//! | Type | Raised by | Seen by |
//! |------|-----------|---------|
//! | [`CapabilityError`] | registry, cache, gateway | downstream plugins |
//! | [`ProviderError`] | provider adapters | the worker pool, which tags it with the provider name |
//! | [`StoreError`] | document stores | the persistence gateway |
//!
//! Every type is `Clone` so a single in-flight load can hand the same
//! failure to all of its waiters.

use std::time::Duration;

use thiserror::Error;

use crate::capability::CapabilityKind;
use crate::key::EntityKey;

// =============================================================================
// Capability Errors
// =============================================================================

/// Errors surfaced to callers of the capability API.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    /// No active provider backs the requested kind.
    #[error("capability '{kind}' is not available")]
    NotAvailable {
        /// The kind that was requested.
        kind: CapabilityKind,
    },

    /// The provider plugin crashed or unloaded mid-call.
    #[error("provider '{provider}' is unavailable: {reason}")]
    ProviderUnavailable {
        /// Provider name.
        provider: String,
        /// Reason for failure.
        reason: String,
    },

    /// The underlying system rejected the request.
    #[error("provider '{provider}' rejected the request: {reason}")]
    ProviderError {
        /// Provider name.
        provider: String,
        /// Reason for rejection.
        reason: String,
    },

    /// A provider call exceeded its time budget.
    #[error("provider '{provider}' did not answer within {after:?}")]
    ProviderTimeout {
        /// Provider name.
        provider: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// A persistence round-trip exceeded its time budget.
    #[error("persistence round-trip did not complete within {after:?}")]
    PersistenceTimeout {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The document store could not be reached.
    #[error("persistence store unavailable: {reason}")]
    PersistenceUnavailable {
        /// Reason for failure.
        reason: String,
    },

    /// A write exhausted its retry budget.
    #[error("durable write of {kind} for {key} failed after {attempts} attempt(s): {reason}")]
    DurableWriteFailed {
        /// Entity the write belonged to.
        key: EntityKey,
        /// Capability the write belonged to.
        kind: CapabilityKind,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last failure reason.
        reason: String,
    },

    /// A value could not be converted to or from its document form.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The caller's context went away before the result was ready.
    #[error("call cancelled: caller context is gone")]
    Cancelled,
}

impl CapabilityError {
    /// Creates a not-available error.
    pub fn not_available(kind: CapabilityKind) -> Self {
        Self::NotAvailable { kind }
    }

    /// Creates a persistence-unavailable error.
    pub fn persistence_unavailable(reason: impl Into<String>) -> Self {
        Self::PersistenceUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Returns `true` for failures that a later retry may fix.
    ///
    /// The cache serves last-known-good values only for transient failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable { .. }
                | Self::ProviderTimeout { .. }
                | Self::PersistenceTimeout { .. }
                | Self::PersistenceUnavailable { .. }
        )
    }
}

impl From<serde_json::Error> for CapabilityError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Provider Errors
// =============================================================================

/// Failures raised by a provider adapter.
///
/// Adapters do not know their registry name at the failure site, so the
/// worker pool attaches it via [`ProviderError::into_capability`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider plugin is disabled, unloaded or crashed.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Creates an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates a rejection error.
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Lifts this error into the caller-facing taxonomy.
    pub fn into_capability(self, provider: &str) -> CapabilityError {
        match self {
            Self::Unavailable(reason) => CapabilityError::ProviderUnavailable {
                provider: provider.to_string(),
                reason,
            },
            Self::Rejected(reason) => CapabilityError::ProviderError {
                provider: provider.to_string(),
                reason,
            },
        }
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Failures raised by a document store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store cannot be reached right now.
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// The store answered too slowly.
    #[error("store timed out after {0:?}")]
    Timeout(Duration),

    /// A stored document could not be decoded or encoded.
    #[error("document serialization failed: {0}")]
    Serialization(String),

    /// Local I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Creates an unreachable error.
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::Unreachable(msg.into())
    }

    /// Lifts this error into the caller-facing taxonomy.
    pub fn into_capability(self) -> CapabilityError {
        match self {
            Self::Timeout(after) => CapabilityError::PersistenceTimeout { after },
            Self::Serialization(msg) => CapabilityError::Serialization(msg),
            other => CapabilityError::persistence_unavailable(other.to_string()),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for capability operations.
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Result type for provider adapter calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Result type for document store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_keeps_its_category() {
        let err = ProviderError::unavailable("plugin disabled").into_capability("LuckPerms");
        assert!(matches!(err, CapabilityError::ProviderUnavailable { ref provider, .. } if provider == "LuckPerms"));
        assert!(err.is_transient());

        let err = ProviderError::rejected("unknown group").into_capability("LuckPerms");
        assert!(matches!(err, CapabilityError::ProviderError { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_store_timeout_maps_to_persistence_timeout() {
        let err = StoreError::Timeout(Duration::from_secs(2)).into_capability();
        assert!(matches!(err, CapabilityError::PersistenceTimeout { .. }));
        assert!(!CapabilityError::not_available(CapabilityKind::MapMarker).is_transient());
    }
}
