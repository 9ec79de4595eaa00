//! Lands: areas owned by a player, with role and natural flags.

use std::sync::Arc;

use async_trait::async_trait;
use niveria_core::{
    CapabilityProvider, ClaimInfo, EntityKey, LandClaimProvider, Location, Provider, ProviderResult, Value,
};
use niveria_framework::{ProviderDescriptor, ensure_enabled, native_error};
use serde_json::json;
use tracing::trace;
use uuid::Uuid;


/// Name the adapter registers under.
pub const LANDS_PROVIDER: &str = "Lands";

const DEFAULT_PRIORITY: i32 = 60;

/// The land covering a location.
#[derive(Debug, Clone, PartialEq)]
pub struct LandArea {
    pub land: String,
    pub world: String,
    pub owner: Uuid,
    pub trusted: Vec<Uuid>,
}

/// Host-side binding to a running Lands instance.
#[async_trait]
pub trait LandsApi: Send + Sync + 'static {
    fn is_enabled(&self) -> bool;

    /// Area at a block position, if claimed.
    async fn area_at(&self, world: &str, x: i32, y: i32, z: i32) -> anyhow::Result<Option<LandArea>>;

    /// Role flag of `player` inside `land`.
    async fn has_role_flag(&self, land: &str, player: Uuid, flag: &str) -> anyhow::Result<bool>;

    /// Natural (environment) flag of `land`.
    async fn has_natural_flag(&self, land: &str, flag: &str) -> anyhow::Result<bool>;

    /// Names of the lands `player` owns.
    async fn lands_of(&self, player: Uuid) -> anyhow::Result<Vec<String>>;
}

/// Land-claim provider backed by Lands.
pub struct LandsAdapter<A> {
    api: Arc<A>,
}

impl<A> Clone for LandsAdapter<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
        }
    }
}

impl<A: LandsApi> LandsAdapter<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    /// Descriptor that is only available while Lands is enabled.
    pub fn descriptor(&self) -> ProviderDescriptor {
        let api = Arc::clone(&self.api);
        ProviderDescriptor::new(LANDS_PROVIDER, CapabilityProvider::LandClaim(Arc::new(self.clone())))
            .priority(DEFAULT_PRIORITY)
            .available_when(move || api.is_enabled())
    }

    async fn area(&self, location: &Location) -> ProviderResult<Option<LandArea>> {
        ensure_enabled(LANDS_PROVIDER, self.api.is_enabled())?;
        self.api
            .area_at(
                &location.world,
                location.x.floor() as i32,
                location.y.floor() as i32,
                location.z.floor() as i32,
            )
            .await
            .map_err(|e| native_error(LANDS_PROVIDER, self.api.is_enabled(), e))
    }
}

#[async_trait]
impl<A: LandsApi> Provider for LandsAdapter<A> {
    fn name(&self) -> &str {
        LANDS_PROVIDER
    }

    /// Lands owned by the player, as `{"lands": [...]}`.
    async fn fetch(&self, key: &EntityKey) -> ProviderResult<Option<Value>> {
        ensure_enabled(LANDS_PROVIDER, self.api.is_enabled())?;
        let lands = self
            .api
            .lands_of(key.id())
            .await
            .map_err(|e| native_error(LANDS_PROVIDER, self.api.is_enabled(), e))?;
        Ok(Some(json!({ "lands": lands })))
    }
}

#[async_trait]
impl<A: LandsApi> LandClaimProvider for LandsAdapter<A> {
    async fn claim_at(&self, location: &Location) -> ProviderResult<Option<ClaimInfo>> {
        Ok(self.area(location).await?.map(|area| ClaimInfo {
            id: area.land,
            world: area.world,
            owner: Some(EntityKey::new(area.owner)),
            members: area.trusted.into_iter().map(EntityKey::new).collect(),
            priority: 0,
        }))
    }

    async fn has_flag(&self, location: &Location, actor: Option<&EntityKey>, flag: &str) -> ProviderResult<bool> {
        let Some(area) = self.area(location).await? else {
            return Ok(true);
        };

        let result = match actor {
            Some(actor) => self.api.has_role_flag(&area.land, actor.id(), flag).await,
            None => self.api.has_natural_flag(&area.land, flag).await,
        };
        let allowed = result.map_err(|e| native_error(LANDS_PROVIDER, self.api.is_enabled(), e))?;
        trace!(land = %area.land, flag, allowed, "Lands flag evaluated");
        Ok(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use niveria_core::ProviderError;
    use niveria_framework::CapabilityContext;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const OWNER: Uuid = Uuid::from_u128(1);
    const GUEST: Uuid = Uuid::from_u128(2);

    struct FakeLands {
        enabled: AtomicBool,
        area_lookups: AtomicUsize,
    }

    impl FakeLands {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                enabled: AtomicBool::new(true),
                area_lookups: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LandsApi for FakeLands {
        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        // Everything east of x = 0 in "world" belongs to the "harbor" land.
        async fn area_at(&self, world: &str, x: i32, _y: i32, _z: i32) -> anyhow::Result<Option<LandArea>> {
            self.area_lookups.fetch_add(1, Ordering::SeqCst);
            if world == "broken" {
                anyhow::bail!("lands database is locked");
            }
            Ok((world == "world" && x >= 0).then(|| LandArea {
                land: "harbor".into(),
                world: world.into(),
                owner: OWNER,
                trusted: vec![Uuid::from_u128(3)],
            }))
        }

        async fn has_role_flag(&self, _land: &str, player: Uuid, flag: &str) -> anyhow::Result<bool> {
            Ok(player == OWNER || flag == "interact_door")
        }

        async fn has_natural_flag(&self, _land: &str, flag: &str) -> anyhow::Result<bool> {
            Ok(flag != "monster_spawn")
        }

        async fn lands_of(&self, player: Uuid) -> anyhow::Result<Vec<String>> {
            Ok(if player == OWNER { vec!["harbor".into()] } else { vec![] })
        }
    }

    #[tokio::test]
    async fn test_claims_and_flags_through_context() {
        let api = FakeLands::new();
        let ctx = CapabilityContext::builder().build();
        ctx.registry().register(LandsAdapter::new(Arc::clone(&api)).descriptor());

        let claimed = Location::new("world", 20.0, 64.0, 5.0);
        let same_block = Location::new("world", 20.7, 64.3, 5.9);
        let wild = Location::new("world", -40.0, 64.0, 5.0);

        assert_eq!(ctx.owner_of(&claimed).await.unwrap(), Some(EntityKey::new(OWNER)));
        assert_eq!(ctx.claim_at(&same_block).await.unwrap().unwrap().id, "harbor");
        assert_eq!(api.area_lookups.load(Ordering::SeqCst), 1);

        let guest = EntityKey::new(GUEST);
        assert!(!ctx.has_claim_flag(&claimed, Some(&guest), "block_break").await.unwrap());
        assert!(ctx.has_claim_flag(&claimed, Some(&guest), "interact_door").await.unwrap());
        assert!(!ctx.has_claim_flag(&claimed, None, "monster_spawn").await.unwrap());
        assert!(ctx.has_claim_flag(&wild, Some(&guest), "block_break").await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_lists_owned_lands_and_errors_map() {
        let api = FakeLands::new();
        let adapter = LandsAdapter::new(Arc::clone(&api));

        let owned = adapter.fetch(&EntityKey::new(OWNER)).await.unwrap();
        assert_eq!(owned, Some(json!({"lands": ["harbor"]})));

        let broken = adapter.claim_at(&Location::new("broken", 0.0, 0.0, 0.0)).await;
        assert!(matches!(broken, Err(ProviderError::Rejected(_))));

        api.enabled.store(false, Ordering::SeqCst);
        let disabled = adapter.claim_at(&Location::new("world", 0.0, 0.0, 0.0)).await;
        assert!(matches!(disabled, Err(ProviderError::Unavailable(_))));
    }
}
