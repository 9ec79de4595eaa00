//! Provider descriptor: the static metadata a provider registers with.

use std::fmt;
use std::sync::Arc;

use niveria_core::{CapabilityKind, CapabilityProvider, ProviderError, ProviderResult};

// ─── API versioning ──────────────────────────────────────────────────────────

/// Current provider API version (1.0).
pub const NIVERIA_PROVIDER_API_VERSION: u32 = 0x0001_0000;

/// Availability predicate evaluated at registration and on every refresh.
pub type AvailabilityFn = Arc<dyn Fn() -> bool + Send + Sync>;

// ─── Adapter errors ──────────────────────────────────────────────────────────

/// Maps a native plugin failure to a provider error: a rejection while
/// `plugin` is enabled, unavailability once it is not.
pub fn native_error(plugin: &str, enabled: bool, err: impl fmt::Display) -> ProviderError {
    if enabled {
        ProviderError::rejected(format!("{err:#}"))
    } else {
        ProviderError::unavailable(format!("{plugin} is disabled: {err:#}"))
    }
}

/// Fails with [`ProviderError::Unavailable`] unless `plugin` is enabled.
pub fn ensure_enabled(plugin: &str, enabled: bool) -> ProviderResult<()> {
    if enabled {
        Ok(())
    } else {
        Err(ProviderError::unavailable(format!("{plugin} is disabled")))
    }
}

// ─── ProviderDescriptor ──────────────────────────────────────────────────────

/// Describes one provider: capability kind, identity, priority and an
/// availability predicate (is the third-party plugin present and enabled?).
///
/// # Example
///
/// ```rust,ignore
/// let desc = ProviderDescriptor::new("LuckPerms", CapabilityProvider::Permissions(adapter))
///     .priority(10)
///     .available_when(move || server.is_plugin_enabled("LuckPerms"));
/// registry.register(desc);
/// ```
#[derive(Clone)]
pub struct ProviderDescriptor {
    /// Provider API version this descriptor was built against.
    pub api_version: u32,

    /// Provider identity (used in logs, config overrides and `deregister`).
    pub name: String,

    /// Declared priority; higher wins.
    pub priority: i32,

    /// Discovery signal: is the backing plugin present?
    pub available: AvailabilityFn,

    /// The adapter itself, tagged with its capability.
    pub provider: CapabilityProvider,
}

impl ProviderDescriptor {
    /// Creates a descriptor with priority 0 that is always available.
    pub fn new(name: impl Into<String>, provider: CapabilityProvider) -> Self {
        Self {
            api_version: NIVERIA_PROVIDER_API_VERSION,
            name: name.into(),
            priority: 0,
            available: Arc::new(|| true),
            provider,
        }
    }

    /// Sets the declared priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the availability predicate.
    pub fn available_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.available = Arc::new(predicate);
        self
    }

    /// Capability this descriptor registers against.
    #[inline]
    pub fn kind(&self) -> CapabilityKind {
        self.provider.kind()
    }

    /// Evaluates the availability predicate.
    #[inline]
    pub fn is_available(&self) -> bool {
        (self.available)()
    }

    /// Returns `true` if this descriptor's API version is compatible with the
    /// running framework.
    ///
    /// The major part must match exactly; the descriptor's minor part must be
    /// ≤ the host's minor part.
    pub fn is_compatible(&self) -> bool {
        let host_major = NIVERIA_PROVIDER_API_VERSION >> 16;
        let desc_major = self.api_version >> 16;
        let desc_minor = self.api_version & 0xFFFF;
        let host_minor = NIVERIA_PROVIDER_API_VERSION & 0xFFFF;
        desc_major == host_major && desc_minor <= host_minor
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("kind", &self.kind())
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("api_version", &format_args!("{:#x}", self.api_version))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_errors_follow_plugin_state() {
        assert_eq!(
            native_error("Dynmap", true, "marker set missing"),
            ProviderError::Rejected("marker set missing".into())
        );
        assert_eq!(
            native_error("Dynmap", false, "marker set missing"),
            ProviderError::Unavailable("Dynmap is disabled: marker set missing".into())
        );
        assert!(ensure_enabled("Dynmap", true).is_ok());
        assert_eq!(
            ensure_enabled("Dynmap", false),
            Err(ProviderError::Unavailable("Dynmap is disabled".into()))
        );
    }
}
