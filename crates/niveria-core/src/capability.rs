//! Capability kinds and provider handles.
//!
//! A [`CapabilityKind`] names one category of player/entity functionality
//! that may be backed by different third-party systems. A
//! [`ProviderHandle`] identifies one loaded provider for a kind; the
//! registry keeps at most one handle per kind `active` at a time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// CapabilityKind
// =============================================================================

/// The fixed set of capabilities known at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Permission nodes and meta (LuckPerms, ...).
    Permissions,
    /// Claimed land and region ownership (Lands, WorldGuard, ...).
    LandClaim,
    /// Web-map markers and player visibility (BlueMap, Squaremap, Dynmap).
    MapMarker,
    /// Cross-session profile data persisted by the gateway.
    ProfileStore,
}

impl CapabilityKind {
    /// Every kind, in declaration order.
    pub const ALL: [CapabilityKind; 4] = [
        Self::Permissions,
        Self::LandClaim,
        Self::MapMarker,
        Self::ProfileStore,
    ];

    /// Returns the snake_case name used in config keys and file paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permissions => "permissions",
            Self::LandClaim => "land_claim",
            Self::MapMarker => "map_marker",
            Self::ProfileStore => "profile_store",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "permissions" | "permission" => Ok(Self::Permissions),
            "land_claim" | "landclaim" | "claims" => Ok(Self::LandClaim),
            "map_marker" | "mapmarker" | "markers" => Ok(Self::MapMarker),
            "profile_store" | "profilestore" | "profiles" => Ok(Self::ProfileStore),
            other => Err(format!("unknown capability kind '{other}'")),
        }
    }
}

// =============================================================================
// ProviderHandle
// =============================================================================

/// Identifies a loaded provider for one capability kind.
///
/// Handles are snapshots: `active` reflects the registry state at the time
/// the handle was produced and flips when providers load or unload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHandle {
    /// Capability this provider backs.
    pub kind: CapabilityKind,
    /// Provider identity, usually the third-party plugin name.
    pub name: String,
    /// Declared priority; higher wins.
    pub priority: i32,
    /// Whether this provider currently backs `kind`.
    pub active: bool,
}

impl fmt::Display for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} (priority {}{})",
            self.kind,
            self.name,
            self.priority,
            if self.active { ", active" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in CapabilityKind::ALL {
            assert_eq!(kind.as_str().parse::<CapabilityKind>(), Ok(kind));
        }
        assert!("teleport".parse::<CapabilityKind>().is_err());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&CapabilityKind::LandClaim).unwrap();
        assert_eq!(json, "\"land_claim\"");
    }
}
