//! Stable entity identities.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for identities derived from non-player things (blocks, markers).
const DERIVED_NAMESPACE: Uuid = Uuid::from_u128(0x6e69_7665_7269_6100_8000_0000_0000_0001);

/// Stable identity for a player or entity.
///
/// A key is a UUID plus an optional world-scope qualifier. Keys are
/// immutable once created; constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

impl EntityKey {
    /// Key for a global entity (typically a player).
    pub fn new(id: Uuid) -> Self {
        Self { id, scope: None }
    }

    /// Key qualified by a world or other scope.
    pub fn scoped(id: Uuid, scope: impl Into<String>) -> Self {
        Self {
            id,
            scope: Some(scope.into()),
        }
    }

    /// Key for a block of a world, derived deterministically from its coordinates.
    pub fn block(world: &str, x: i32, y: i32, z: i32) -> Self {
        let name = format!("block:{world}:{x}:{y}:{z}");
        Self::scoped(Uuid::new_v5(&DERIVED_NAMESPACE, name.as_bytes()), world)
    }

    /// Key for a named map marker.
    pub fn marker(marker_id: &str) -> Self {
        let name = format!("marker:{marker_id}");
        Self::scoped(Uuid::new_v5(&DERIVED_NAMESPACE, name.as_bytes()), "markers")
    }

    /// Returns the UUID part.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the scope qualifier, if any.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// File-system safe rendering: `<uuid>` or `<uuid>@<scope>`.
    ///
    /// The scope is percent-encoded byte by byte (everything but ASCII
    /// alphanumerics, `-` and `_`), so distinct scopes never share a stem.
    pub fn file_stem(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}@{}", self.id, encode_scope(scope)),
            None => self.id.to_string(),
        }
    }
}

fn encode_scope(scope: &str) -> String {
    let mut encoded = String::with_capacity(scope.len());
    for byte in scope.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

impl From<Uuid> for EntityKey {
    fn from(id: Uuid) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}@{scope}", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_keys_are_deterministic() {
        let a = EntityKey::block("world", 3, 64, -7);
        let b = EntityKey::block("world", 3, 64, -7);
        assert_eq!(a, b);
        assert_eq!(a.scope(), Some("world"));
        assert_ne!(a, EntityKey::block("world_nether", 3, 64, -7));
        assert_ne!(a, EntityKey::block("world", -7, 64, 3));
        assert_ne!(a, EntityKey::block("world", 3, 65, -7));
    }

    #[test]
    fn test_scope_is_part_of_identity() {
        let id = Uuid::new_v4();
        assert_ne!(EntityKey::new(id), EntityKey::scoped(id, "world"));
        assert_eq!(EntityKey::scoped(id, "a b").file_stem(), format!("{id}@a%20b"));
    }

    #[test]
    fn test_file_stems_do_not_collide() {
        let id = Uuid::from_u128(7);
        let stems: Vec<String> = ["a b", "a_b", "a%20b", "a/b", "a.b", "ä"]
            .iter()
            .map(|scope| EntityKey::scoped(id, *scope).file_stem())
            .collect();
        for (i, stem) in stems.iter().enumerate() {
            assert!(stems[i + 1..].iter().all(|other| other != stem), "{stem} collides");
            assert!(!stem.contains('/') && !stem.contains('.'));
        }
    }
}
