//! Provider contracts.
//!
//! Every adapter implements [`Provider`] (record fetch/store) plus exactly one
//! capability-specific trait. The registry stores adapters as a tagged
//! [`CapabilityProvider`] so the active provider for a kind can be re-pointed
//! at runtime without an inheritance tree.
//!
//! Adapters are pure translators: no caching and no retries. Both live above
//! them in the framework.
//!
//! # Example
//!
//! ```rust,ignore
//! struct StaticPerms;
//!
//! #[async_trait]
//! impl Provider for StaticPerms {
//!     fn name(&self) -> &str { "static" }
//!     async fn fetch(&self, _key: &EntityKey) -> ProviderResult<Option<Value>> { Ok(None) }
//! }
//!
//! #[async_trait]
//! impl PermissionProvider for StaticPerms {
//!     async fn has_permission(&self, _key: &EntityKey, node: &str) -> ProviderResult<bool> {
//!         Ok(node.starts_with("public."))
//!     }
//! }
//!
//! let provider = CapabilityProvider::Permissions(Arc::new(StaticPerms));
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::capability::CapabilityKind;
use crate::error::ProviderResult;
use crate::key::EntityKey;
use crate::model::{ClaimInfo, Location, Marker};

// =============================================================================
// Base contract
// =============================================================================

/// Record-level contract shared by every capability.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Provider identity (used in logs and error messages).
    fn name(&self) -> &str;

    /// Materializes the capability record for `key`.
    ///
    /// `Ok(None)` means the provider has no record; the framework then
    /// consults the persisted snapshot.
    async fn fetch(&self, key: &EntityKey) -> ProviderResult<Option<Value>>;

    /// Mirrors a locally set record into the provider.
    ///
    /// Providers that do not own such records accept the write unchanged;
    /// the framework persists it either way.
    async fn store(&self, key: &EntityKey, value: &Value) -> ProviderResult<()> {
        let _ = (key, value);
        Ok(())
    }
}

// =============================================================================
// Capability-specific contracts
// =============================================================================

/// Permission engines.
#[async_trait]
pub trait PermissionProvider: Provider {
    /// Evaluates one permission node.
    async fn has_permission(&self, key: &EntityKey, node: &str) -> ProviderResult<bool>;
}

/// Land-claim systems.
#[async_trait]
pub trait LandClaimProvider: Provider {
    /// Claim covering `location`, if any.
    async fn claim_at(&self, location: &Location) -> ProviderResult<Option<ClaimInfo>>;

    /// Owner of the claim covering `location`.
    async fn owner_of(&self, location: &Location) -> ProviderResult<Option<EntityKey>> {
        Ok(self.claim_at(location).await?.and_then(|claim| claim.owner))
    }

    /// Evaluates a claim flag at `location`, optionally for a specific actor.
    ///
    /// Unclaimed land has no restrictions, so implementations return `true`
    /// when no claim covers `location`.
    async fn has_flag(
        &self,
        location: &Location,
        actor: Option<&EntityKey>,
        flag: &str,
    ) -> ProviderResult<bool>;
}

/// Web-map renderers.
#[async_trait]
pub trait MapMarkerProvider: Provider {
    /// Creates or replaces a marker.
    async fn upsert_marker(&self, marker: &Marker) -> ProviderResult<()>;

    /// Removes a marker; removing an unknown marker is not an error.
    async fn remove_marker(&self, marker_id: &str) -> ProviderResult<()>;

    /// Hides or shows a player on the map.
    async fn set_hidden(&self, key: &EntityKey, hidden: bool) -> ProviderResult<()>;
}

/// Profile stores.
#[async_trait]
pub trait ProfileProvider: Provider {
    /// Default document for a player seen for the first time.
    fn default_profile(&self, key: &EntityKey) -> Value {
        let _ = key;
        Value::Object(Default::default())
    }
}

// =============================================================================
// Tagged registry entry
// =============================================================================

/// An adapter tagged with the capability it backs.
#[derive(Clone)]
pub enum CapabilityProvider {
    /// Permission engine.
    Permissions(Arc<dyn PermissionProvider>),
    /// Land-claim system.
    LandClaim(Arc<dyn LandClaimProvider>),
    /// Web-map renderer.
    MapMarker(Arc<dyn MapMarkerProvider>),
    /// Profile store.
    ProfileStore(Arc<dyn ProfileProvider>),
}

impl CapabilityProvider {
    /// The capability this entry backs.
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::Permissions(_) => CapabilityKind::Permissions,
            Self::LandClaim(_) => CapabilityKind::LandClaim,
            Self::MapMarker(_) => CapabilityKind::MapMarker,
            Self::ProfileStore(_) => CapabilityKind::ProfileStore,
        }
    }

    /// Adapter-reported name.
    pub fn name(&self) -> &str {
        match self {
            Self::Permissions(p) => p.name(),
            Self::LandClaim(p) => p.name(),
            Self::MapMarker(p) => p.name(),
            Self::ProfileStore(p) => p.name(),
        }
    }

    /// Dispatches [`Provider::fetch`] to the wrapped adapter.
    pub async fn fetch(&self, key: &EntityKey) -> ProviderResult<Option<Value>> {
        match self {
            Self::Permissions(p) => p.fetch(key).await,
            Self::LandClaim(p) => p.fetch(key).await,
            Self::MapMarker(p) => p.fetch(key).await,
            Self::ProfileStore(p) => p.fetch(key).await,
        }
    }

    /// Dispatches [`Provider::store`] to the wrapped adapter.
    pub async fn store(&self, key: &EntityKey, value: &Value) -> ProviderResult<()> {
        match self {
            Self::Permissions(p) => p.store(key, value).await,
            Self::LandClaim(p) => p.store(key, value).await,
            Self::MapMarker(p) => p.store(key, value).await,
            Self::ProfileStore(p) => p.store(key, value).await,
        }
    }

    /// Returns the permission adapter, if this entry is one.
    pub fn as_permissions(&self) -> Option<Arc<dyn PermissionProvider>> {
        match self {
            Self::Permissions(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    /// Returns the land-claim adapter, if this entry is one.
    pub fn as_land_claim(&self) -> Option<Arc<dyn LandClaimProvider>> {
        match self {
            Self::LandClaim(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    /// Returns the map-marker adapter, if this entry is one.
    pub fn as_map_marker(&self) -> Option<Arc<dyn MapMarkerProvider>> {
        match self {
            Self::MapMarker(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    /// Returns the profile adapter, if this entry is one.
    pub fn as_profile_store(&self) -> Option<Arc<dyn ProfileProvider>> {
        match self {
            Self::ProfileStore(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for CapabilityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityProvider")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    struct Ledger;

    #[async_trait]
    impl Provider for Ledger {
        fn name(&self) -> &str {
            "ledger"
        }

        async fn fetch(&self, key: &EntityKey) -> ProviderResult<Option<Value>> {
            Ok(Some(Value::String(key.to_string())))
        }
    }

    #[async_trait]
    impl LandClaimProvider for Ledger {
        async fn claim_at(&self, location: &Location) -> ProviderResult<Option<ClaimInfo>> {
            if location.world == "void" {
                return Err(ProviderError::rejected("no such world"));
            }
            Ok(Some(ClaimInfo {
                id: "spawn".into(),
                world: location.world.clone(),
                owner: Some(EntityKey::new(uuid::Uuid::nil())),
                members: Vec::new(),
                priority: 0,
            }))
        }

        async fn has_flag(
            &self,
            _location: &Location,
            _actor: Option<&EntityKey>,
            _flag: &str,
        ) -> ProviderResult<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_tagged_entry_dispatches_to_adapter() {
        let entry = CapabilityProvider::LandClaim(Arc::new(Ledger));
        assert_eq!(entry.kind(), CapabilityKind::LandClaim);
        assert_eq!(entry.name(), "ledger");
        assert!(entry.as_permissions().is_none());

        let key = EntityKey::new(uuid::Uuid::nil());
        assert!(entry.fetch(&key).await.unwrap().is_some());
        assert!(entry.store(&key, &Value::Null).await.is_ok());

        let claims = entry.as_land_claim().unwrap();
        let owner = claims
            .owner_of(&Location::new("world", 0.0, 64.0, 0.0))
            .await
            .unwrap();
        assert_eq!(owner, Some(key));
        assert!(claims.owner_of(&Location::new("void", 0.0, 0.0, 0.0)).await.is_err());
    }
}
