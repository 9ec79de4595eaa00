//! Configuration for the Niveria runtime.
//!
//! Layered figment loading (defaults, TOML/YAML files, `NIVERIA_*`
//! environment), a serde schema, and validation. The schema converts into
//! the framework's settings types so the runtime never reads raw numbers.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    CacheConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, NiveriaConfig, PersistenceConfig,
    ProvidersConfig, RetryConfig, SpanEventConfig, StoreConfig,
};
pub use validation::validate_config;
