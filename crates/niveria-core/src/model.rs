//! Capability payload types.
//!
//! These are the materialized results that adapters produce and the cache
//! holds (as documents). They carry no provider-specific state.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::key::EntityKey;

// ─── Location ────────────────────────────────────────────────────────────────

/// A block position in a named world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// World name.
    pub world: String,
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl Location {
    /// Creates a location.
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// Integer block coordinates containing this location.
    pub fn block(&self) -> (i32, i32, i32) {
        (self.x.floor() as i32, self.y.floor() as i32, self.z.floor() as i32)
    }

    /// Cache identity of the block containing this location.
    ///
    /// Regions can end mid-chunk and cover only some heights, so claim
    /// lookups are never shared across blocks.
    pub fn block_key(&self) -> EntityKey {
        let (x, y, z) = self.block();
        EntityKey::block(&self.world, x, y, z)
    }
}

// ─── Permissions ─────────────────────────────────────────────────────────────

/// Materialized permission state for one entity.
///
/// Only nodes the provider resolved explicitly appear in `permissions`; a
/// missing node means "ask the provider", never "denied".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionSnapshot {
    /// Resolved permission nodes.
    #[serde(default)]
    pub permissions: BTreeMap<String, bool>,
    /// Meta values by key; a key may carry several values, the first wins.
    #[serde(default)]
    pub meta: BTreeMap<String, Vec<String>>,
    /// Primary group, when the provider has the concept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_group: Option<String>,
}

impl PermissionSnapshot {
    /// Returns the resolved value of `node`, if the snapshot knows it.
    pub fn check(&self, node: &str) -> Option<bool> {
        self.permissions.get(node).copied()
    }

    /// First raw meta value for `key`.
    pub fn meta_raw(&self, key: &str) -> Option<&str> {
        self.meta
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All meta values for `key`; empty when the key is absent.
    pub fn meta_list(&self, key: &str) -> &[String] {
        self.meta.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Parses the first meta value for `key`.
    ///
    /// Returns `Ok(None)` when the key is absent and `Err(raw)` when a value
    /// exists but does not parse as `T`.
    pub fn meta<T: FromStr>(&self, key: &str) -> Result<Option<T>, String> {
        match self.meta_raw(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| raw.to_string()),
        }
    }

    /// Boolean meta, accepting `true/false`, `yes/no` and `1/0`.
    pub fn meta_bool(&self, key: &str) -> Result<Option<bool>, String> {
        match self.meta_raw(key) {
            None => Ok(None),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Some(true)),
                "false" | "no" | "0" => Ok(Some(false)),
                _ => Err(raw.to_string()),
            },
        }
    }
}

// ─── Land claims ─────────────────────────────────────────────────────────────

/// A claimed area as reported by a land-claim provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimInfo {
    /// Provider-side identifier (land name, region id).
    pub id: String,
    /// World the claim lives in.
    pub world: String,
    /// Owning entity, if the claim has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<EntityKey>,
    /// Trusted members besides the owner.
    #[serde(default)]
    pub members: Vec<EntityKey>,
    /// Claim priority (regions overlap; higher wins).
    #[serde(default)]
    pub priority: i32,
}

// ─── Map markers ─────────────────────────────────────────────────────────────

/// A point marker on a web map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    /// Stable marker identifier.
    pub id: String,
    /// Hover / popup label.
    pub label: String,
    /// Position of the marker.
    pub position: Location,
    /// Icon name understood by the map provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Marker set / layer the marker belongs to.
    #[serde(default = "default_marker_set")]
    pub set: String,
}

fn default_marker_set() -> String {
    "niveria".to_string()
}

impl Marker {
    /// Creates a marker in the default set.
    pub fn new(id: impl Into<String>, label: impl Into<String>, position: Location) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            position,
            icon: None,
            set: default_marker_set(),
        }
    }

    /// Sets the icon.
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Moves the marker into another set.
    pub fn in_set(mut self, set: impl Into<String>) -> Self {
        self.set = set.into();
        self
    }

    /// Cache identity of this marker.
    pub fn key(&self) -> EntityKey {
        EntityKey::marker(&self.id)
    }
}

/// Per-player map visibility record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapVisibility {
    /// Whether the player is hidden from the web map.
    pub hidden: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> PermissionSnapshot {
        let mut snap = PermissionSnapshot::default();
        snap.permissions.insert("essentials.fly".into(), true);
        snap.meta.insert("max-homes".into(), vec!["5".into()]);
        snap.meta.insert("vanish".into(), vec!["yes".into()]);
        snap.meta.insert("prefix".into(), vec!["[VIP]".into(), "[Old]".into()]);
        snap
    }

    #[test]
    fn test_meta_parsing() {
        let snap = snapshot();
        assert_eq!(snap.meta::<u32>("max-homes"), Ok(Some(5)));
        assert_eq!(snap.meta::<u32>("missing"), Ok(None));
        assert_eq!(snap.meta::<u32>("prefix"), Err("[VIP]".to_string()));
        assert_eq!(snap.meta_bool("vanish"), Ok(Some(true)));
        assert_eq!(snap.meta_list("prefix").len(), 2);
        assert!(snap.meta_list("missing").is_empty());
    }

    #[test]
    fn test_unknown_node_is_not_a_denial() {
        let snap = snapshot();
        assert_eq!(snap.check("essentials.fly"), Some(true));
        assert_eq!(snap.check("essentials.god"), None);
    }

    #[test]
    fn test_negative_coordinates_floor_into_blocks() {
        assert_eq!(Location::new("world", -0.5, 64.9, 15.9).block(), (-1, 64, 15));
        assert_eq!(Location::new("world", 16.0, -1.2, -16.5).block(), (16, -2, -17));
    }

    #[test]
    fn test_block_keys_separate_neighbours() {
        let inside = Location::new("world", 99.7, 64.0, 0.0);
        assert_eq!(inside.block_key(), Location::new("world", 99.1, 64.5, 0.9).block_key());
        assert_ne!(inside.block_key(), Location::new("world", 100.0, 64.0, 0.0).block_key());
        assert_ne!(inside.block_key(), Location::new("world", 99.7, 65.0, 0.0).block_key());
    }
}
