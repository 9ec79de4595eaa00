//! Dynmap: markers in marker sets, player visibility.

use std::sync::Arc;

use async_trait::async_trait;
use niveria_core::{
    CapabilityProvider, EntityKey, MapMarkerProvider, Marker, Provider, ProviderResult, Value,
};
use niveria_framework::{ProviderDescriptor, ensure_enabled, native_error};
use uuid::Uuid;

use crate::MarkerSets;

/// Name the adapter registers under.
pub const DYNMAP_PROVIDER: &str = "dynmap";

const DEFAULT_PRIORITY: i32 = 10;

/// Icon used when a marker names none.
const DEFAULT_ICON: &str = "default";

/// Host-side binding to the Dynmap marker API.
#[async_trait]
pub trait DynmapApi: Send + Sync + 'static {
    fn is_enabled(&self) -> bool;

    /// Creates the marker, or moves and relabels it if it exists.
    async fn create_marker(&self, set: &str, id: &str, icon: &str, marker: &Marker) -> anyhow::Result<()>;

    async fn delete_marker(&self, set: &str, id: &str) -> anyhow::Result<()>;

    async fn set_player_visible(&self, player: Uuid, visible: bool) -> anyhow::Result<()>;
}

/// Map-marker provider backed by Dynmap.
pub struct DynmapAdapter<A> {
    api: Arc<A>,
    sets: Arc<MarkerSets>,
}

impl<A> Clone for DynmapAdapter<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            sets: Arc::clone(&self.sets),
        }
    }
}

impl<A: DynmapApi> DynmapAdapter<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            sets: Arc::new(MarkerSets::default()),
        }
    }

    pub fn descriptor(&self) -> ProviderDescriptor {
        let api = Arc::clone(&self.api);
        ProviderDescriptor::new(DYNMAP_PROVIDER, CapabilityProvider::MapMarker(Arc::new(self.clone())))
            .priority(DEFAULT_PRIORITY)
            .available_when(move || api.is_enabled())
    }
}

#[async_trait]
impl<A: DynmapApi> Provider for DynmapAdapter<A> {
    fn name(&self) -> &str {
        DYNMAP_PROVIDER
    }

    async fn fetch(&self, _key: &EntityKey) -> ProviderResult<Option<Value>> {
        Ok(None)
    }
}

#[async_trait]
impl<A: DynmapApi> MapMarkerProvider for DynmapAdapter<A> {
    async fn upsert_marker(&self, marker: &Marker) -> ProviderResult<()> {
        ensure_enabled(DYNMAP_PROVIDER, self.api.is_enabled())?;
        if let Some(previous) = self.sets.remember(&marker.id, &marker.set)
            && previous != marker.set
        {
            self.api
                .delete_marker(&previous, &marker.id)
                .await
                .map_err(|e| native_error(DYNMAP_PROVIDER, self.api.is_enabled(), e))?;
        }

        let icon = marker.icon.as_deref().unwrap_or(DEFAULT_ICON);
        self.api
            .create_marker(&marker.set, &marker.id, icon, marker)
            .await
            .map_err(|e| native_error(DYNMAP_PROVIDER, self.api.is_enabled(), e))
    }

    async fn remove_marker(&self, marker_id: &str) -> ProviderResult<()> {
        ensure_enabled(DYNMAP_PROVIDER, self.api.is_enabled())?;
        let Some(set) = self.sets.forget(marker_id) else {
            return Ok(());
        };
        self.api
            .delete_marker(&set, marker_id)
            .await
            .map_err(|e| native_error(DYNMAP_PROVIDER, self.api.is_enabled(), e))
    }

    async fn set_hidden(&self, key: &EntityKey, hidden: bool) -> ProviderResult<()> {
        ensure_enabled(DYNMAP_PROVIDER, self.api.is_enabled())?;
        self.api
            .set_player_visible(key.id(), !hidden)
            .await
            .map_err(|e| native_error(DYNMAP_PROVIDER, self.api.is_enabled(), e))
    }
}
