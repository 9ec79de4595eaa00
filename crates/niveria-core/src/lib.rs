//! # Niveria Core
//!
//! Data model and contracts shared by every layer of the Niveria
//! capability system.
//!
//! Downstream game plugins want to ask "does this player have this
//! permission?" or "who owns this chunk?" without hard-depending on
//! whichever third-party plugin answers. This crate defines the vocabulary
//! for that:
//!
//! - **Capabilities**: [`CapabilityKind`] and [`ProviderHandle`]
//! - **Identity**: [`EntityKey`] (player UUID, optionally world-scoped)
//! - **Provider contracts**: [`Provider`] plus one trait per capability,
//!   stored in the registry as a tagged [`CapabilityProvider`]
//! - **Persistence contract**: [`DocumentStore`] and [`StoredDocument`]
//!   with field-level last-write-wins
//! - **Events**: [`CapabilityEvent`]
//! - **Errors**: [`CapabilityError`], [`ProviderError`], [`StoreError`]
//!
//! ```text
//! downstream plugin ──▶ registry ──▶ cache ──▶ provider adapter
//!                                      │
//!                                      └──▶ persistence gateway ──▶ DocumentStore
//! ```
//!
//! The moving parts (registry, cache, gateway, bus) live in
//! `niveria-framework`.

pub mod capability;
pub mod document;
pub mod error;
pub mod event;
pub mod key;
pub mod model;
pub mod provider;
pub mod retry;

pub use capability::{CapabilityKind, ProviderHandle};
pub use document::{DocumentStore, StoredDocument, get_path, remove_path, set_path};
pub use error::{
    CapabilityError, CapabilityResult, ProviderError, ProviderResult, StoreError, StoreResult,
};
pub use event::{CapabilityEvent, ChangeOrigin};
pub use key::EntityKey;
pub use model::{ClaimInfo, Location, MapVisibility, Marker, PermissionSnapshot};
pub use provider::{
    CapabilityProvider, LandClaimProvider, MapMarkerProvider, PermissionProvider, ProfileProvider,
    Provider,
};
pub use retry::RetryPolicy;

// Re-exported so adapters and stores share one version.
pub use async_trait::async_trait;
pub use serde_json::Value;
