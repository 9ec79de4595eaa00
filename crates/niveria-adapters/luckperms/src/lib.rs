//! # LuckPerms adapter for Niveria
//!
//! Backs [`CapabilityKind::Permissions`](niveria_core::CapabilityKind) with a
//! LuckPerms-shaped permission engine.
//!
//! The host implements [`LuckPermsApi`] over the real plugin (service
//! lookup, cached user data, the `UserDataRecalculateEvent` bus) and
//! registers the adapter:
//!
//! ```rust,ignore
//! use niveria_adapter_luckperms::LuckPermsAdapter;
//!
//! let adapter = LuckPermsAdapter::new(Arc::new(HostLuckPerms::lookup()));
//! adapter.forward_recalculations(&ctx);
//! ctx.registry().register(adapter.descriptor());
//! ```
//!
//! ## Mapping
//!
//! | Niveria | LuckPerms |
//! |---------|-----------|
//! | `fetch` | cached user data → [`PermissionSnapshot`](niveria_core::PermissionSnapshot) |
//! | `has_permission` | permission check; `Undefined` counts as denied |
//! | `notify_changed` | user data recalculated |
//!
//! Calls made while the plugin is disabled fail as *unavailable*; any other
//! native failure is a *rejection*.

pub mod adapter;
pub mod api;

pub use adapter::{LUCKPERMS_PROVIDER, LuckPermsAdapter};
pub use api::{LuckPermsApi, RecalculateListener, Tristate, UserData};
