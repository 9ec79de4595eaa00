//! # Web-map adapters for Niveria
//!
//! Adapters for [`CapabilityKind::MapMarker`](niveria_core::CapabilityKind),
//! one per renderer:
//!
//! | Adapter | Feature | Default priority |
//! |---------|---------|------------------|
//! | [`BlueMapAdapter`] | `bluemap` | 30 |
//! | [`SquaremapAdapter`] | `squaremap` | 20 |
//! | [`DynmapAdapter`] | `dynmap` | 10 |
//!
//! Renderers address markers by (set, id) while Niveria addresses them by
//! id alone, so every adapter remembers which set each marker went into.
//! Map state is not owned by the renderers: `fetch` reports no record and
//! the persisted snapshot is authoritative.

use std::collections::HashMap;

use parking_lot::Mutex;

#[cfg(feature = "bluemap")]
pub mod bluemap;
#[cfg(feature = "dynmap")]
pub mod dynmap;
#[cfg(feature = "squaremap")]
pub mod squaremap;

#[cfg(feature = "bluemap")]
pub use bluemap::{BLUEMAP_PROVIDER, BlueMapAdapter, BlueMapApi};
#[cfg(feature = "dynmap")]
pub use dynmap::{DYNMAP_PROVIDER, DynmapAdapter, DynmapApi};
#[cfg(feature = "squaremap")]
pub use squaremap::{SQUAREMAP_PROVIDER, SquaremapAdapter, SquaremapApi};

/// Marker id → marker set, for renderers that need both to delete.
#[derive(Debug, Default)]
pub(crate) struct MarkerSets {
    sets: Mutex<HashMap<String, String>>,
}

impl MarkerSets {
    pub(crate) fn remember(&self, id: &str, set: &str) -> Option<String> {
        self.sets.lock().insert(id.to_string(), set.to_string())
    }

    pub(crate) fn forget(&self, id: &str) -> Option<String> {
        self.sets.lock().remove(id)
    }
}
