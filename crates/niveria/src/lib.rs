//! # Niveria
//!
//! One API for permissions, land claims, map markers and player profiles,
//! whichever server plugin actually provides them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────┐     ┌─────────────────────────────┐
//! │ downstream plugin│────▶│   Context    │────▶│ Registry ─▶ provider adapter│ (LuckPerms, Lands, ...)
//! └──────────────────┘     │              │────▶│ EntityCache (LRU + TTL)     │
//!                          │              │────▶│ PersistenceGateway ─▶ store │
//!                          └──────────────┘────▶│ EventBus ─▶ listeners       │
//!                                               └─────────────────────────────┘
//! ```
//!
//! - **Runtime**: loads configuration, installs logging, runs the flusher
//! - **Registry**: picks the active provider per capability, hot-swap aware
//! - **Cache**: single-flight loads, write-through commits, change events
//! - **Gateway**: coalescing write-behind queue with retry and backoff
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use niveria::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = NiveriaRuntime::builder().build()?;
//!     runtime.start().await;
//!
//!     let ctx = runtime.context();
//!     let player = EntityKey::new(uuid);
//!     if ctx.has_permission(&player, "towns.create").await? {
//!         ctx.set_field(&player, CapabilityKind::ProfileStore, "towns.created", &1).await?;
//!     }
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` / `yaml-config`: configuration file formats
//! - `json-log`: JSON log output
//! - `file-store`: JSON-file document store (default)
//! - `adapter-luckperms`, `adapter-claims`, `adapter-maps`: provider adapters

pub use niveria_core as core;
pub use niveria_framework as framework;
pub use niveria_runtime as runtime;

#[cfg(feature = "adapter-claims")]
pub use niveria_adapter_claims as claims;
#[cfg(feature = "adapter-luckperms")]
pub use niveria_adapter_luckperms as luckperms;
#[cfg(feature = "adapter-maps")]
pub use niveria_adapter_maps as maps;

/// Commonly used types.
///
/// ```rust,ignore
/// use niveria::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use niveria_runtime::{NiveriaConfig, NiveriaRuntime, RuntimeBuilder};

    // Context - what downstream plugins call
    pub use niveria_framework::{CapabilityContext, Delivery, ProviderDescriptor, SubscriptionId};

    // Data model
    pub use niveria_core::{
        CapabilityEvent, CapabilityKind, ClaimInfo, EntityKey, Location, MapVisibility, Marker,
        PermissionSnapshot, ProviderHandle,
    };

    // Errors
    pub use niveria_core::{CapabilityError, CapabilityResult, ProviderError, ProviderResult};

    // Contracts for custom providers
    pub use niveria_core::{
        CapabilityProvider, LandClaimProvider, MapMarkerProvider, PermissionProvider, ProfileProvider,
        Provider, async_trait,
    };
}
