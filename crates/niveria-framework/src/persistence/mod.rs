//! Persistence: the coalescing write queue and the gateway that drains it.

mod gateway;
mod queue;

pub use gateway::{FlushReport, PersistenceGateway, PersistenceSettings, QueueStats};
pub use queue::{FailedWrite, PendingWrite};
