//! # Land-claim adapters for Niveria
//!
//! Two adapters for [`CapabilityKind::LandClaim`](niveria_core::CapabilityKind):
//!
//! - [`LandsAdapter`] (feature `lands`): one land per area, role flags for
//!   players and natural flags for the environment.
//! - [`WorldGuardAdapter`] (feature `worldguard`): overlapping regions; the
//!   highest-priority region covering a location is the claim.
//!
//! Both treat unclaimed locations as unrestricted. Register whichever
//! plugin the server runs; if both are present the priorities decide
//! (Lands is preferred by default).
//!
//! ```rust,ignore
//! ctx.registry().register(LandsAdapter::new(Arc::new(HostLands::new())).descriptor());
//! ctx.registry().register(WorldGuardAdapter::new(Arc::new(HostWorldGuard::new())).descriptor());
//! ```

#[cfg(feature = "lands")]
pub mod lands;
#[cfg(feature = "worldguard")]
pub mod worldguard;

#[cfg(feature = "lands")]
pub use lands::{LANDS_PROVIDER, LandArea, LandsAdapter, LandsApi};
#[cfg(feature = "worldguard")]
pub use worldguard::{Region, WORLDGUARD_PROVIDER, WorldGuardAdapter, WorldGuardApi};
