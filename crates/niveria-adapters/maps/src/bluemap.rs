//! BlueMap: POI markers in marker sets, per-player web-app visibility.

use std::sync::Arc;

use async_trait::async_trait;
use niveria_core::{
    CapabilityProvider, EntityKey, MapMarkerProvider, Marker, Provider, ProviderResult, Value,
};
use niveria_framework::{ProviderDescriptor, ensure_enabled, native_error};
use tracing::debug;
use uuid::Uuid;

use crate::MarkerSets;

/// Name the adapter registers under.
pub const BLUEMAP_PROVIDER: &str = "BlueMap";

const DEFAULT_PRIORITY: i32 = 30;

/// Set used to remove markers this adapter never saw placed.
const FALLBACK_SET: &str = "niveria";

/// Host-side binding to the BlueMap API.
#[async_trait]
pub trait BlueMapApi: Send + Sync + 'static {
    fn is_enabled(&self) -> bool;

    /// Creates or replaces a POI marker in `set`.
    async fn put_poi(&self, set: &str, id: &str, marker: &Marker) -> anyhow::Result<()>;

    /// Removes a POI marker; unknown ids are ignored.
    async fn remove_poi(&self, set: &str, id: &str) -> anyhow::Result<()>;

    /// Shows or hides a player in the web app.
    async fn set_player_visibility(&self, player: Uuid, visible: bool) -> anyhow::Result<()>;
}

/// Map-marker provider backed by BlueMap.
pub struct BlueMapAdapter<A> {
    api: Arc<A>,
    sets: Arc<MarkerSets>,
}

impl<A> Clone for BlueMapAdapter<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            sets: Arc::clone(&self.sets),
        }
    }
}

impl<A: BlueMapApi> BlueMapAdapter<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            sets: Arc::new(MarkerSets::default()),
        }
    }

    /// Descriptor that is only available while BlueMap is enabled.
    pub fn descriptor(&self) -> ProviderDescriptor {
        let api = Arc::clone(&self.api);
        ProviderDescriptor::new(BLUEMAP_PROVIDER, CapabilityProvider::MapMarker(Arc::new(self.clone())))
            .priority(DEFAULT_PRIORITY)
            .available_when(move || api.is_enabled())
    }

    fn map_err(&self, err: anyhow::Error) -> niveria_core::ProviderError {
        native_error(BLUEMAP_PROVIDER, self.api.is_enabled(), err)
    }
}

#[async_trait]
impl<A: BlueMapApi> Provider for BlueMapAdapter<A> {
    fn name(&self) -> &str {
        BLUEMAP_PROVIDER
    }

    async fn fetch(&self, _key: &EntityKey) -> ProviderResult<Option<Value>> {
        Ok(None)
    }
}

#[async_trait]
impl<A: BlueMapApi> MapMarkerProvider for BlueMapAdapter<A> {
    async fn upsert_marker(&self, marker: &Marker) -> ProviderResult<()> {
        ensure_enabled(BLUEMAP_PROVIDER, self.api.is_enabled())?;
        self.api
            .put_poi(&marker.set, &marker.id, marker)
            .await
            .map_err(|e| self.map_err(e))?;

        // A marker that moved sets must not linger in the old one.
        if let Some(previous) = self.sets.remember(&marker.id, &marker.set)
            && previous != marker.set
        {
            debug!(marker = %marker.id, from = %previous, to = %marker.set, "Marker moved between sets");
            self.api
                .remove_poi(&previous, &marker.id)
                .await
                .map_err(|e| self.map_err(e))?;
        }
        Ok(())
    }

    async fn remove_marker(&self, marker_id: &str) -> ProviderResult<()> {
        ensure_enabled(BLUEMAP_PROVIDER, self.api.is_enabled())?;
        let set = self.sets.forget(marker_id).unwrap_or_else(|| FALLBACK_SET.to_string());
        self.api
            .remove_poi(&set, marker_id)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn set_hidden(&self, key: &EntityKey, hidden: bool) -> ProviderResult<()> {
        ensure_enabled(BLUEMAP_PROVIDER, self.api.is_enabled())?;
        self.api
            .set_player_visibility(key.id(), !hidden)
            .await
            .map_err(|e| self.map_err(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use niveria_core::{CapabilityError, CapabilityKind, Location, MapVisibility};
    use niveria_framework::CapabilityContext;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeBlueMap {
        disabled: AtomicBool,
        pois: Mutex<HashMap<(String, String), String>>,
        hidden: Mutex<HashSet<Uuid>>,
    }

    #[async_trait]
    impl BlueMapApi for FakeBlueMap {
        fn is_enabled(&self) -> bool {
            !self.disabled.load(Ordering::SeqCst)
        }

        async fn put_poi(&self, set: &str, id: &str, marker: &Marker) -> anyhow::Result<()> {
            self.pois
                .lock()
                .insert((set.to_string(), id.to_string()), marker.label.clone());
            Ok(())
        }

        async fn remove_poi(&self, set: &str, id: &str) -> anyhow::Result<()> {
            self.pois.lock().remove(&(set.to_string(), id.to_string()));
            Ok(())
        }

        async fn set_player_visibility(&self, player: Uuid, visible: bool) -> anyhow::Result<()> {
            let mut hidden = self.hidden.lock();
            if visible {
                hidden.remove(&player);
            } else {
                hidden.insert(player);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_markers_and_visibility_through_context() {
        let api = Arc::new(FakeBlueMap::default());
        let ctx = CapabilityContext::builder().build();
        ctx.registry().register(BlueMapAdapter::new(Arc::clone(&api)).descriptor());

        let spawn = Marker::new("spawn", "Spawn", Location::new("world", 0.0, 64.0, 0.0));
        ctx.upsert_marker(&spawn).await.unwrap();
        ctx.upsert_marker(&spawn.clone().in_set("towns")).await.unwrap();
        {
            let pois = api.pois.lock();
            assert_eq!(pois.len(), 1);
            assert!(pois.contains_key(&("towns".to_string(), "spawn".to_string())));
        }
        assert_eq!(ctx.marker("spawn").await.unwrap().unwrap().set, "towns");

        ctx.remove_marker("spawn").await.unwrap();
        assert!(api.pois.lock().is_empty());
        assert_eq!(ctx.marker("spawn").await.unwrap(), None);

        let player = EntityKey::new(Uuid::from_u128(8));
        ctx.set_hidden(&player, true).await.unwrap();
        assert!(api.hidden.lock().contains(&player.id()));
        let visibility: Option<MapVisibility> = ctx.get(&player, CapabilityKind::MapMarker).await.unwrap();
        assert_eq!(visibility, Some(MapVisibility { hidden: true }));
    }

    #[tokio::test]
    async fn test_disabled_bluemap_is_unavailable() {
        let api = Arc::new(FakeBlueMap::default());
        let adapter = BlueMapAdapter::new(Arc::clone(&api));
        let ctx = CapabilityContext::builder().build();
        ctx.registry().register(adapter.descriptor());

        api.disabled.store(true, Ordering::SeqCst);
        let result = ctx.set_hidden(&EntityKey::new(Uuid::from_u128(1)), true).await;
        assert!(matches!(result, Err(CapabilityError::ProviderUnavailable { .. })));
    }
}
