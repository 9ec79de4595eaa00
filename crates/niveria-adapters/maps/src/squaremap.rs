//! squaremap: icon markers in layers, player hiding.

use std::sync::Arc;

use async_trait::async_trait;
use niveria_core::{
    CapabilityProvider, EntityKey, MapMarkerProvider, Marker, Provider, ProviderError, ProviderResult, Value,
};
use niveria_framework::{ProviderDescriptor, ensure_enabled, native_error};
use uuid::Uuid;

use crate::MarkerSets;

/// Name the adapter registers under.
pub const SQUAREMAP_PROVIDER: &str = "squaremap";

const DEFAULT_PRIORITY: i32 = 20;

/// Host-side binding to the squaremap API.
#[async_trait]
pub trait SquaremapApi: Send + Sync + 'static {
    fn is_enabled(&self) -> bool;

    /// Whether squaremap renders `world` at all.
    fn renders_world(&self, world: &str) -> bool;

    /// Adds or replaces a marker in a layer of `world`.
    async fn add_marker(&self, world: &str, layer: &str, key: &str, marker: &Marker) -> anyhow::Result<()>;

    /// Removes a marker from every rendered world's `layer`.
    async fn remove_marker(&self, layer: &str, key: &str) -> anyhow::Result<()>;

    async fn set_player_hidden(&self, player: Uuid, hidden: bool) -> anyhow::Result<()>;
}

/// Map-marker provider backed by squaremap.
pub struct SquaremapAdapter<A> {
    api: Arc<A>,
    layers: Arc<MarkerSets>,
}

impl<A> Clone for SquaremapAdapter<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            layers: Arc::clone(&self.layers),
        }
    }
}

impl<A: SquaremapApi> SquaremapAdapter<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            layers: Arc::new(MarkerSets::default()),
        }
    }

    pub fn descriptor(&self) -> ProviderDescriptor {
        let api = Arc::clone(&self.api);
        ProviderDescriptor::new(SQUAREMAP_PROVIDER, CapabilityProvider::MapMarker(Arc::new(self.clone())))
            .priority(DEFAULT_PRIORITY)
            .available_when(move || api.is_enabled())
    }
}

#[async_trait]
impl<A: SquaremapApi> Provider for SquaremapAdapter<A> {
    fn name(&self) -> &str {
        SQUAREMAP_PROVIDER
    }

    async fn fetch(&self, _key: &EntityKey) -> ProviderResult<Option<Value>> {
        Ok(None)
    }
}

#[async_trait]
impl<A: SquaremapApi> MapMarkerProvider for SquaremapAdapter<A> {
    async fn upsert_marker(&self, marker: &Marker) -> ProviderResult<()> {
        ensure_enabled(SQUAREMAP_PROVIDER, self.api.is_enabled())?;
        if !self.api.renders_world(&marker.position.world) {
            return Err(ProviderError::rejected(format!(
                "squaremap does not render world '{}'",
                marker.position.world
            )));
        }

        if let Some(previous) = self.layers.remember(&marker.id, &marker.set)
            && previous != marker.set
        {
            self.api
                .remove_marker(&previous, &marker.id)
                .await
                .map_err(|e| native_error(SQUAREMAP_PROVIDER, self.api.is_enabled(), e))?;
        }
        self.api
            .add_marker(&marker.position.world, &marker.set, &marker.id, marker)
            .await
            .map_err(|e| native_error(SQUAREMAP_PROVIDER, self.api.is_enabled(), e))
    }

    async fn remove_marker(&self, marker_id: &str) -> ProviderResult<()> {
        ensure_enabled(SQUAREMAP_PROVIDER, self.api.is_enabled())?;
        let Some(layer) = self.layers.forget(marker_id) else {
            return Ok(());
        };
        self.api
            .remove_marker(&layer, marker_id)
            .await
            .map_err(|e| native_error(SQUAREMAP_PROVIDER, self.api.is_enabled(), e))
    }

    async fn set_hidden(&self, key: &EntityKey, hidden: bool) -> ProviderResult<()> {
        ensure_enabled(SQUAREMAP_PROVIDER, self.api.is_enabled())?;
        self.api
            .set_player_hidden(key.id(), hidden)
            .await
            .map_err(|e| native_error(SQUAREMAP_PROVIDER, self.api.is_enabled(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use niveria_core::Location;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSquaremap {
        adds: AtomicUsize,
        removes: AtomicUsize,
    }

    #[async_trait]
    impl SquaremapApi for FakeSquaremap {
        fn is_enabled(&self) -> bool {
            true
        }

        fn renders_world(&self, world: &str) -> bool {
            world != "world_the_end"
        }

        async fn add_marker(&self, _world: &str, _layer: &str, _key: &str, _marker: &Marker) -> anyhow::Result<()> {
            self.adds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn remove_marker(&self, _layer: &str, _key: &str) -> anyhow::Result<()> {
            self.removes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn set_player_hidden(&self, _player: Uuid, _hidden: bool) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unrendered_world_is_rejected_and_unknown_remove_is_noop() {
        let api = Arc::new(FakeSquaremap::default());
        let adapter = SquaremapAdapter::new(Arc::clone(&api));

        let end = Marker::new("portal", "End portal", Location::new("world_the_end", 0.0, 60.0, 0.0));
        assert!(matches!(adapter.upsert_marker(&end).await, Err(ProviderError::Rejected(_))));

        adapter.remove_marker("never-placed").await.unwrap();
        assert_eq!(api.removes.load(Ordering::SeqCst), 0);

        let shop = Marker::new("shop", "Shop", Location::new("world", 5.0, 64.0, 5.0));
        adapter.upsert_marker(&shop).await.unwrap();
        adapter.upsert_marker(&shop.clone().in_set("shops")).await.unwrap();
        assert_eq!(api.adds.load(Ordering::SeqCst), 2);
        assert_eq!(api.removes.load(Ordering::SeqCst), 1);
    }
}
