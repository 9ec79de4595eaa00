//! Niveria Runtime - configuration, logging and lifecycle for the
//! capability layer.
//!
//! This crate provides:
//! - Layered configuration (`niveria.toml`, `NIVERIA_*` environment) via figment
//! - Logging setup on `tracing-subscriber` and `tracing-appender`
//! - [`NiveriaRuntime`]: owns the capability context, runs the persistence
//!   flusher and performs the final flush on shutdown
//!
//! ```ignore
//! use niveria_runtime::NiveriaRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = NiveriaRuntime::builder().build()?;
//!     runtime.context().registry().register(my_permissions_adapter);
//!
//!     // Run until Ctrl+C; unwritten records are flushed before returning.
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, NiveriaConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{NiveriaRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for plugin code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
