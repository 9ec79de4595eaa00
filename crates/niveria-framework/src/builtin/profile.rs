//! Persistence-backed profile store.
//!
//! Registered at the lowest priority so any third-party profile provider
//! takes precedence. It owns no data: `fetch` always reports "no record",
//! which makes the context fall through to the persisted snapshot.

use std::sync::Arc;

use niveria_core::{
    CapabilityProvider, EntityKey, ProfileProvider, Provider, ProviderResult, Value, async_trait,
};
use serde_json::json;

use crate::descriptor::ProviderDescriptor;

/// Name the builtin profile provider registers under.
pub const BUILTIN_PROFILE_PROVIDER: &str = "niveria-profiles";

/// Supplies the default profile document for a new player.
pub type DefaultProfileFn = Arc<dyn Fn(&EntityKey) -> Value + Send + Sync>;

/// The builtin [`ProfileProvider`].
#[derive(Clone)]
pub struct BuiltinProfiles {
    defaults: DefaultProfileFn,
}

impl Default for BuiltinProfiles {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinProfiles {
    /// Provider whose default profile is `{"ip": null, "first_join": 0, "last_join": 0}`.
    pub fn new() -> Self {
        Self {
            defaults: Arc::new(|_| json!({ "ip": null, "first_join": 0, "last_join": 0 })),
        }
    }

    /// Replaces the default-profile supplier.
    pub fn with_defaults<F>(supplier: F) -> Self
    where
        F: Fn(&EntityKey) -> Value + Send + Sync + 'static,
    {
        Self {
            defaults: Arc::new(supplier),
        }
    }

    /// Descriptor at the lowest possible priority.
    pub fn descriptor(self) -> ProviderDescriptor {
        ProviderDescriptor::new(BUILTIN_PROFILE_PROVIDER, CapabilityProvider::ProfileStore(Arc::new(self)))
            .priority(i32::MIN)
    }
}

#[async_trait]
impl Provider for BuiltinProfiles {
    fn name(&self) -> &str {
        BUILTIN_PROFILE_PROVIDER
    }

    async fn fetch(&self, _key: &EntityKey) -> ProviderResult<Option<Value>> {
        Ok(None)
    }
}

impl ProfileProvider for BuiltinProfiles {
    fn default_profile(&self, key: &EntityKey) -> Value {
        (self.defaults)(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use niveria_core::CapabilityKind;

    #[tokio::test]
    async fn test_builtin_defers_to_persistence() {
        let profiles = BuiltinProfiles::with_defaults(|key| json!({ "owner": key.to_string() }));
        let key = EntityKey::new(uuid::Uuid::from_u128(9));

        assert_eq!(profiles.fetch(&key).await.unwrap(), None);
        assert_eq!(profiles.default_profile(&key), json!({ "owner": key.to_string() }));

        let descriptor = profiles.descriptor();
        assert_eq!(descriptor.kind(), CapabilityKind::ProfileStore);
        assert_eq!(descriptor.priority, i32::MIN);
    }
}
