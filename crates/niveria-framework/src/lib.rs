//! # Niveria Framework
//!
//! The moving parts of the capability layer:
//!
//! - [`CapabilityRegistry`]: which provider backs each capability, hot-swap
//!   aware, with logged tie-breaks
//! - [`EntityCache`]: LRU + TTL cache with single-flight loading
//! - [`PersistenceGateway`]: coalescing write-behind queue with backoff, plus
//!   read-through snapshots
//! - [`EventBus`]: ordered fan-out of capability-change events
//! - [`WorkerPool`]: bounded, timed provider calls
//! - [`CapabilityContext`]: the facade downstream plugins use
//!
//! Stores ([`MemoryStore`], and [`FileStore`] with the `file-store` feature)
//! and a builtin persistence-backed profile provider are included.

pub mod builtin;
pub mod bus;
pub mod cache;
pub mod context;
pub mod descriptor;
pub mod persistence;
pub mod pool;
pub mod registry;
pub mod session;
pub mod store;

pub use builtin::{BUILTIN_PROFILE_PROVIDER, BuiltinProfiles};
pub use bus::{CapabilityListener, Delivery, EventBus, SubscriptionId};
pub use cache::{CacheSettings, CacheStats, CachedRecord, EntityCache, RecordId};
pub use context::{CapabilityContext, CapabilityContextBuilder, ContextStats};
pub use descriptor::{
    AvailabilityFn, NIVERIA_PROVIDER_API_VERSION, ProviderDescriptor, ensure_enabled, native_error,
};
pub use persistence::{FailedWrite, FlushReport, PendingWrite, PersistenceGateway, PersistenceSettings, QueueStats};
pub use pool::{PoolSettings, WorkerPool};
pub use registry::{CapabilityRegistry, RegistrySettings, TieBreak};
pub use session::SessionTracker;
pub use store::MemoryStore;

#[cfg(feature = "file-store")]
pub use store::FileStore;
