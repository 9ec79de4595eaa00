//! [`LuckPermsAdapter`]: LuckPerms behind the Niveria permission contract.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use niveria_core::{
    CapabilityKind, CapabilityProvider, EntityKey, PermissionProvider, PermissionSnapshot, Provider,
    ProviderError, ProviderResult, Value,
};
use niveria_framework::{CapabilityContext, ProviderDescriptor, ensure_enabled, native_error};
use tracing::{debug, trace};

use crate::api::{LuckPermsApi, UserData};

/// Name the adapter registers under.
pub const LUCKPERMS_PROVIDER: &str = "LuckPerms";

/// Default registration priority.
const DEFAULT_PRIORITY: i32 = 100;

/// Permission provider backed by LuckPerms.
pub struct LuckPermsAdapter<A> {
    api: Arc<A>,
}

impl<A> Clone for LuckPermsAdapter<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
        }
    }
}

impl<A: LuckPermsApi> LuckPermsAdapter<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    /// Descriptor that is only available while the plugin is enabled.
    pub fn descriptor(&self) -> ProviderDescriptor {
        let api = Arc::clone(&self.api);
        ProviderDescriptor::new(LUCKPERMS_PROVIDER, CapabilityProvider::Permissions(Arc::new(self.clone())))
            .priority(DEFAULT_PRIORITY)
            .available_when(move || api.is_enabled())
    }

    /// Turns LuckPerms recalculations into cache invalidations on `ctx`.
    ///
    /// Holds the context weakly, so a dropped context silently ends the
    /// forwarding.
    pub fn forward_recalculations(&self, ctx: &Arc<CapabilityContext>) {
        let ctx: Weak<CapabilityContext> = Arc::downgrade(ctx);
        self.api.on_user_recalculate(Arc::new(move |uuid| {
            if let Some(ctx) = ctx.upgrade() {
                ctx.notify_changed(&EntityKey::new(uuid), CapabilityKind::Permissions);
            }
        }));
    }
}

fn to_snapshot(data: UserData) -> PermissionSnapshot {
    PermissionSnapshot {
        permissions: data.permissions.into_iter().collect::<BTreeMap<_, _>>(),
        meta: data.meta.into_iter().collect::<BTreeMap<_, _>>(),
        primary_group: Some(data.primary_group).filter(|group| !group.is_empty()),
    }
}

#[async_trait]
impl<A: LuckPermsApi> Provider for LuckPermsAdapter<A> {
    fn name(&self) -> &str {
        LUCKPERMS_PROVIDER
    }

    async fn fetch(&self, key: &EntityKey) -> ProviderResult<Option<Value>> {
        ensure_enabled(LUCKPERMS_PROVIDER, self.api.is_enabled())?;
        let data = self
            .api
            .user_data(key.id())
            .await
            .map_err(|e| native_error(LUCKPERMS_PROVIDER, self.api.is_enabled(), e))?;

        match data {
            Some(data) => {
                let snapshot = to_snapshot(data);
                trace!(key = %key, nodes = snapshot.permissions.len(), "Loaded LuckPerms user");
                serde_json::to_value(snapshot)
                    .map(Some)
                    .map_err(|e| ProviderError::rejected(e.to_string()))
            }
            None => {
                debug!(key = %key, "User not loaded in LuckPerms");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<A: LuckPermsApi> PermissionProvider for LuckPermsAdapter<A> {
    async fn has_permission(&self, key: &EntityKey, node: &str) -> ProviderResult<bool> {
        ensure_enabled(LUCKPERMS_PROVIDER, self.api.is_enabled())?;
        let state = self
            .api
            .check_permission(key.id(), node)
            .await
            .map_err(|e| native_error(LUCKPERMS_PROVIDER, self.api.is_enabled(), e))?;
        Ok(state.as_bool())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{RecalculateListener, Tristate};
    use niveria_core::CapabilityError;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use uuid::Uuid;

    struct FakeLuckPerms {
        enabled: AtomicBool,
        loads: AtomicUsize,
        checks: AtomicUsize,
        listeners: Mutex<Vec<RecalculateListener>>,
    }

    impl FakeLuckPerms {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                enabled: AtomicBool::new(true),
                loads: AtomicUsize::new(0),
                checks: AtomicUsize::new(0),
                listeners: Mutex::new(Vec::new()),
            })
        }

        fn recalculate(&self, uuid: Uuid) {
            for listener in self.listeners.lock().iter() {
                listener(uuid);
            }
        }
    }

    #[async_trait]
    impl LuckPermsApi for FakeLuckPerms {
        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        async fn user_data(&self, uuid: Uuid) -> anyhow::Result<Option<UserData>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if uuid.is_nil() {
                anyhow::bail!("storage backend refused the lookup");
            }
            Ok(Some(UserData {
                permissions: HashMap::from([("essentials.fly".to_string(), true)]),
                meta: HashMap::from([("max-homes".to_string(), vec!["4".to_string()])]),
                primary_group: "builder".into(),
            }))
        }

        async fn check_permission(&self, _uuid: Uuid, node: &str) -> anyhow::Result<Tristate> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            Ok(match node {
                "worldedit.wand" => Tristate::True,
                "essentials.ban" => Tristate::False,
                _ => Tristate::Undefined,
            })
        }

        fn on_user_recalculate(&self, listener: RecalculateListener) {
            self.listeners.lock().push(listener);
        }
    }

    fn player(n: u128) -> EntityKey {
        EntityKey::new(Uuid::from_u128(n))
    }

    #[tokio::test]
    async fn test_snapshot_and_meta_through_context() {
        let api = FakeLuckPerms::new();
        let ctx = CapabilityContext::builder().build();
        let adapter = LuckPermsAdapter::new(Arc::clone(&api));
        let handle = ctx.registry().register(adapter.descriptor());
        assert!(handle.active);

        let key = player(5);
        assert!(ctx.has_permission(&key, "essentials.fly").await.unwrap());
        assert_eq!(ctx.meta::<u32>(&key, "max-homes").await.unwrap(), Some(4));
        assert_eq!(api.loads.load(Ordering::SeqCst), 1);
        assert_eq!(api.checks.load(Ordering::SeqCst), 0);

        // Not in the snapshot: asks LuckPerms; undefined means denied.
        assert!(ctx.has_permission(&key, "worldedit.wand").await.unwrap());
        assert!(!ctx.has_permission(&key, "plots.claim").await.unwrap());
        assert_eq!(api.checks.load(Ordering::SeqCst), 2);

        let snapshot = ctx.permission_snapshot(&key).await.unwrap().unwrap();
        assert_eq!(snapshot.primary_group.as_deref(), Some("builder"));
    }

    #[tokio::test]
    async fn test_recalculation_invalidates_cached_snapshot() {
        let api = FakeLuckPerms::new();
        let ctx = CapabilityContext::builder().build();
        let adapter = LuckPermsAdapter::new(Arc::clone(&api));
        adapter.forward_recalculations(&ctx);
        ctx.registry().register(adapter.descriptor());

        let key = player(6);
        ctx.permission_snapshot(&key).await.unwrap();
        ctx.permission_snapshot(&key).await.unwrap();
        assert_eq!(api.loads.load(Ordering::SeqCst), 1);

        api.recalculate(key.id());
        ctx.permission_snapshot(&key).await.unwrap();
        assert_eq!(api.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_native_errors_are_classified() {
        let api = FakeLuckPerms::new();
        let adapter = LuckPermsAdapter::new(Arc::clone(&api));

        let rejected = adapter.fetch(&EntityKey::new(Uuid::nil())).await.unwrap_err();
        assert!(matches!(rejected, ProviderError::Rejected(_)));

        api.enabled.store(false, Ordering::SeqCst);
        let unavailable = adapter.has_permission(&player(1), "any").await.unwrap_err();
        assert!(matches!(unavailable, ProviderError::Unavailable(_)));
        assert!(!adapter.descriptor().is_available());

        let ctx = CapabilityContext::builder().build();
        let handle = ctx.registry().register(adapter.descriptor());
        assert!(!handle.active);
        assert!(matches!(
            ctx.has_permission(&player(1), "any").await,
            Err(CapabilityError::NotAvailable { .. })
        ));
    }
}
