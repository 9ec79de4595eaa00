//! The slice of the LuckPerms API the adapter needs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

/// Result of a LuckPerms permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tristate {
    True,
    False,
    /// No node matched.
    Undefined,
}

impl Tristate {
    /// Collapses to a boolean; undefined is denied.
    pub fn as_bool(self) -> bool {
        matches!(self, Self::True)
    }
}

/// Cached data of one loaded user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserData {
    /// Resolved permission nodes.
    pub permissions: HashMap<String, bool>,
    /// Meta values; LuckPerms allows several values per key.
    pub meta: HashMap<String, Vec<String>>,
    pub primary_group: String,
}

/// Called with the UUID of every user whose data LuckPerms recalculated.
pub type RecalculateListener = Arc<dyn Fn(Uuid) + Send + Sync>;

/// Host-side binding to a running LuckPerms instance.
#[async_trait]
pub trait LuckPermsApi: Send + Sync + 'static {
    /// Whether the plugin is loaded and enabled right now.
    fn is_enabled(&self) -> bool;

    /// Cached data of a user, or `None` when the user is not loaded.
    async fn user_data(&self, uuid: Uuid) -> anyhow::Result<Option<UserData>>;

    /// Checks one node for a user.
    async fn check_permission(&self, uuid: Uuid, node: &str) -> anyhow::Result<Tristate>;

    /// Subscribes to user data recalculation.
    fn on_user_recalculate(&self, listener: RecalculateListener);
}
