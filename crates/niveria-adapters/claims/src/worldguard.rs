//! WorldGuard: overlapping regions ranked by priority.
//!
//! The claim at a location is the highest-priority region covering it; on
//! equal priority the region id decides, so lookups are deterministic.
//! A flag is answered by the highest-priority region that sets it. When no
//! covering region sets the flag, owners and members of the claim are
//! allowed and everyone else is not.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use niveria_core::{
    CapabilityProvider, ClaimInfo, EntityKey, LandClaimProvider, Location, Provider, ProviderResult, Value,
};
use niveria_framework::{ProviderDescriptor, ensure_enabled, native_error};
use tracing::trace;
use uuid::Uuid;


/// Name the adapter registers under.
pub const WORLDGUARD_PROVIDER: &str = "WorldGuard";

const DEFAULT_PRIORITY: i32 = 50;

/// A protected region.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Region {
    pub id: String,
    pub priority: i32,
    pub owners: Vec<Uuid>,
    pub members: Vec<Uuid>,
    /// State flags set on the region: `true` is ALLOW, `false` is DENY.
    pub flags: HashMap<String, bool>,
}

impl Region {
    fn includes(&self, player: Uuid) -> bool {
        self.owners.contains(&player) || self.members.contains(&player)
    }
}

/// Host-side binding to a running WorldGuard instance.
#[async_trait]
pub trait WorldGuardApi: Send + Sync + 'static {
    fn is_enabled(&self) -> bool;

    /// Every region containing the block, in any order.
    async fn regions_at(&self, world: &str, x: i32, y: i32, z: i32) -> anyhow::Result<Vec<Region>>;
}

/// Land-claim provider backed by WorldGuard regions.
pub struct WorldGuardAdapter<A> {
    api: Arc<A>,
}

impl<A> Clone for WorldGuardAdapter<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
        }
    }
}

impl<A: WorldGuardApi> WorldGuardAdapter<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    /// Descriptor that is only available while WorldGuard is enabled.
    pub fn descriptor(&self) -> ProviderDescriptor {
        let api = Arc::clone(&self.api);
        ProviderDescriptor::new(WORLDGUARD_PROVIDER, CapabilityProvider::LandClaim(Arc::new(self.clone())))
            .priority(DEFAULT_PRIORITY)
            .available_when(move || api.is_enabled())
    }

    /// Covering regions, best first.
    async fn ranked_regions(&self, location: &Location) -> ProviderResult<Vec<Region>> {
        ensure_enabled(WORLDGUARD_PROVIDER, self.api.is_enabled())?;
        let mut regions = self
            .api
            .regions_at(
                &location.world,
                location.x.floor() as i32,
                location.y.floor() as i32,
                location.z.floor() as i32,
            )
            .await
            .map_err(|e| native_error(WORLDGUARD_PROVIDER, self.api.is_enabled(), e))?;
        regions.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(regions)
    }
}

#[async_trait]
impl<A: WorldGuardApi> Provider for WorldGuardAdapter<A> {
    fn name(&self) -> &str {
        WORLDGUARD_PROVIDER
    }

    /// WorldGuard keeps no per-player record.
    async fn fetch(&self, _key: &EntityKey) -> ProviderResult<Option<Value>> {
        Ok(None)
    }
}

#[async_trait]
impl<A: WorldGuardApi> LandClaimProvider for WorldGuardAdapter<A> {
    async fn claim_at(&self, location: &Location) -> ProviderResult<Option<ClaimInfo>> {
        let regions = self.ranked_regions(location).await?;
        Ok(regions.into_iter().next().map(|region| {
            // Co-owners after the first count as trusted members.
            let members = region.owners.iter().skip(1).chain(region.members.iter());
            ClaimInfo {
                owner: region.owners.first().copied().map(EntityKey::new),
                members: members.copied().map(EntityKey::new).collect(),
                id: region.id,
                world: location.world.clone(),
                priority: region.priority,
            }
        }))
    }

    async fn has_flag(&self, location: &Location, actor: Option<&EntityKey>, flag: &str) -> ProviderResult<bool> {
        let regions = self.ranked_regions(location).await?;
        let Some(top) = regions.first() else {
            return Ok(true);
        };

        if let Some((region, allowed)) = regions
            .iter()
            .find_map(|region| region.flags.get(flag).map(|allowed| (region, *allowed)))
        {
            trace!(region = %region.id, flag, allowed, "WorldGuard flag set by region");
            return Ok(allowed);
        }

        Ok(actor.is_none_or(|actor| top.includes(actor.id())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use niveria_framework::CapabilityContext;
    use std::sync::atomic::{AtomicBool, Ordering};

    const MAYOR: Uuid = Uuid::from_u128(10);
    const BUILDER: Uuid = Uuid::from_u128(11);
    const VISITOR: Uuid = Uuid::from_u128(12);

    struct FakeWorldGuard {
        enabled: AtomicBool,
    }

    #[async_trait]
    impl WorldGuardApi for FakeWorldGuard {
        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        // A "town" region covers x in [0, 100); a higher-priority "market"
        // region sits inside it at x in [10, 20). A "garden" at x in
        // [200, 210) has members but no owner.
        async fn regions_at(&self, _world: &str, x: i32, _y: i32, _z: i32) -> anyhow::Result<Vec<Region>> {
            let mut regions = Vec::new();
            if (0..100).contains(&x) {
                regions.push(Region {
                    id: "town".into(),
                    priority: 1,
                    owners: vec![MAYOR],
                    members: vec![BUILDER],
                    flags: HashMap::from([("pvp".to_string(), false)]),
                });
            }
            if (200..210).contains(&x) {
                regions.push(Region {
                    id: "garden".into(),
                    priority: 0,
                    owners: vec![],
                    members: vec![BUILDER, VISITOR],
                    flags: HashMap::new(),
                });
            }
            if (10..20).contains(&x) {
                regions.push(Region {
                    id: "market".into(),
                    priority: 5,
                    owners: vec![],
                    members: vec![],
                    flags: HashMap::from([("pvp".to_string(), true), ("chest-access".to_string(), true)]),
                });
            }
            Ok(regions)
        }
    }

    fn adapter() -> WorldGuardAdapter<FakeWorldGuard> {
        WorldGuardAdapter::new(Arc::new(FakeWorldGuard {
            enabled: AtomicBool::new(true),
        }))
    }

    #[tokio::test]
    async fn test_highest_priority_region_wins() {
        let adapter = adapter();
        let market = Location::new("world", 15.0, 64.0, 0.0);
        let town = Location::new("world", 50.0, 64.0, 0.0);

        let claim = adapter.claim_at(&market).await.unwrap().unwrap();
        assert_eq!((claim.id.as_str(), claim.priority, claim.owner), ("market", 5, None));

        let claim = adapter.claim_at(&town).await.unwrap().unwrap();
        assert_eq!(claim.owner, Some(EntityKey::new(MAYOR)));
        assert_eq!(claim.members, vec![EntityKey::new(BUILDER)]);

        assert!(adapter.has_flag(&market, None, "pvp").await.unwrap());
        assert!(!adapter.has_flag(&town, None, "pvp").await.unwrap());
    }

    #[tokio::test]
    async fn test_unset_flag_falls_back_to_membership() {
        let ctx = CapabilityContext::builder().build();
        ctx.registry().register(adapter().descriptor());
        let town = Location::new("world", 50.0, 64.0, 0.0);
        let wilderness = Location::new("world", 500.0, 64.0, 0.0);

        let builder = EntityKey::new(BUILDER);
        let visitor = EntityKey::new(VISITOR);
        assert!(ctx.has_claim_flag(&town, Some(&builder), "build").await.unwrap());
        assert!(!ctx.has_claim_flag(&town, Some(&visitor), "build").await.unwrap());
        assert!(ctx.has_claim_flag(&wilderness, Some(&visitor), "build").await.unwrap());
        assert_eq!(ctx.claim_at(&wilderness).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_members_only_region_has_no_owner() {
        let claim = adapter()
            .claim_at(&Location::new("world", 205.0, 64.0, 0.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claim.id, "garden");
        assert_eq!(claim.owner, None);
        assert_eq!(claim.members, vec![EntityKey::new(BUILDER), EntityKey::new(VISITOR)]);
    }

    #[tokio::test]
    async fn test_region_edge_inside_a_chunk_is_enforced() {
        let ctx = CapabilityContext::builder().build();
        ctx.registry().register(adapter().descriptor());
        let visitor = EntityKey::new(VISITOR);

        // x 98 and x 105 share a chunk; the town ends at x 100.
        assert_eq!(ctx.claim_at(&Location::new("world", 105.0, 64.0, 0.0)).await.unwrap(), None);
        let inside = Location::new("world", 98.0, 64.0, 0.0);
        assert_eq!(ctx.claim_at(&inside).await.unwrap().unwrap().id, "town");
        assert!(!ctx.has_claim_flag(&inside, Some(&visitor), "build").await.unwrap());
    }
}
