//! Configuration schema definitions.
//!
//! Durations are written in milliseconds (`*_ms`) and converted into the
//! framework settings types by the `to_settings` helpers.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use niveria_core::{CapabilityKind, RetryPolicy};
use niveria_framework::{CacheSettings, PersistenceSettings, PoolSettings, RegistrySettings, TieBreak};
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NiveriaConfig {
    /// Logging setup.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Entity cache sizing and freshness.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Write-behind queue and document store.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Provider selection and call limits.
    #[serde(default)]
    pub providers: ProvidersConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Lowercase name, as accepted by `EnvFilter` directives.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to the `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Line format of emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `Full` without it.
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Span lifecycle events to log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global level; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, required when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Rotated files to keep.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line of the call site.
    #[serde(default)]
    pub file_location: bool,

    /// Per-module levels, e.g. `niveria_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            rotation: LogRotation::default(),
            max_files: default_max_files(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            filters: HashMap::new(),
        }
    }
}

fn default_max_files() -> usize {
    5
}

// =============================================================================
// Cache
// =============================================================================

/// Entity cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum records held before LRU eviction.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// TTL for kinds without an explicit entry.
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Per-kind TTL, keyed by kind name (`permissions`, `land_claim`, ...).
    #[serde(default = "default_kind_ttls")]
    pub ttl_ms: HashMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            default_ttl_ms: default_ttl_ms(),
            ttl_ms: default_kind_ttls(),
        }
    }
}

impl CacheConfig {
    /// Converts to cache settings. Unknown kind names are skipped here and
    /// rejected by validation.
    pub fn to_settings(&self) -> CacheSettings {
        let ttl = self
            .ttl_ms
            .iter()
            .filter_map(|(name, ms)| {
                let kind = CapabilityKind::from_str(name).ok()?;
                Some((kind, Duration::from_millis(*ms)))
            })
            .collect();

        CacheSettings {
            capacity: self.capacity,
            default_ttl: Duration::from_millis(self.default_ttl_ms),
            ttl,
        }
    }
}

fn default_capacity() -> usize {
    10_000
}

fn default_ttl_ms() -> u64 {
    300_000
}

fn default_kind_ttls() -> HashMap<String, u64> {
    HashMap::from([
        (CapabilityKind::Permissions.as_str().to_string(), 60_000),
        (CapabilityKind::LandClaim.as_str().to_string(), 900_000),
    ])
}

// =============================================================================
// Persistence
// =============================================================================

/// Backing document store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local; nothing survives a restart.
    #[default]
    Memory,
    /// One JSON document per record under `base_dir`.
    File {
        #[serde(default = "default_base_dir")]
        base_dir: PathBuf,
    },
}

fn default_base_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("niveria"))
        .unwrap_or_else(|| PathBuf::from("niveria-data"))
}

/// Retry configuration for queued writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per write before it is parked as failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Converts to the core retry policy.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
            jitter: self.jitter,
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

/// Persistence gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Period of the background flush.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Queue depth that triggers an early flush; also the batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Budget for one store round trip.
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,

    /// Period of the store ping that re-queues parked writes.
    #[serde(default = "default_connectivity_check_ms")]
    pub connectivity_check_ms: u64,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            batch_size: default_batch_size(),
            timeout_ms: default_store_timeout_ms(),
            connectivity_check_ms: default_connectivity_check_ms(),
            store: StoreConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl PersistenceConfig {
    /// Converts to gateway settings.
    pub fn to_settings(&self) -> PersistenceSettings {
        PersistenceSettings {
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            batch_size: self.batch_size,
            timeout: Duration::from_millis(self.timeout_ms),
            connectivity_check: Duration::from_millis(self.connectivity_check_ms),
            retry: self.retry.to_policy(),
        }
    }
}

fn default_flush_interval_ms() -> u64 {
    2_000
}

fn default_batch_size() -> usize {
    64
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_connectivity_check_ms() -> u64 {
    15_000
}

// =============================================================================
// Providers
// =============================================================================

/// Provider selection and call limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Budget of a single adapter call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Equal-priority resolution.
    #[serde(default)]
    pub tie_break: TieBreak,

    /// Provider names that are never activated.
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Priority replacements by provider name.
    #[serde(default)]
    pub priority_overrides: HashMap<String, i32>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            max_concurrent_calls: default_max_concurrent_calls(),
            tie_break: TieBreak::default(),
            disabled: Vec::new(),
            priority_overrides: HashMap::new(),
        }
    }
}

impl ProvidersConfig {
    /// Converts to registry settings.
    pub fn to_registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            tie_break: self.tie_break,
            disabled: self.disabled.iter().cloned().collect::<HashSet<_>>(),
            priority_overrides: self.priority_overrides.clone(),
        }
    }

    /// Converts to worker pool settings.
    pub fn to_pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_concurrent: self.max_concurrent_calls,
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_max_concurrent_calls() -> usize {
    16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_convert_to_settings() {
        let config = NiveriaConfig::default();

        let cache = config.cache.to_settings();
        assert_eq!(cache.capacity, 10_000);
        assert_eq!(cache.ttl_for(CapabilityKind::Permissions), Duration::from_secs(60));
        assert_eq!(cache.ttl_for(CapabilityKind::LandClaim), Duration::from_secs(900));
        assert_eq!(cache.ttl_for(CapabilityKind::MapMarker), Duration::from_secs(300));

        let persistence = config.persistence.to_settings();
        assert_eq!(persistence.batch_size, 64);
        assert_eq!(persistence.retry.max_attempts, 5);
        assert_eq!(config.persistence.store, StoreConfig::Memory);

        let registry = config.providers.to_registry_settings();
        assert_eq!(registry.tie_break, TieBreak::Registration);
        assert!(registry.disabled.is_empty());
    }

    #[test]
    fn test_store_config_is_tagged() {
        let store: StoreConfig =
            serde_json::from_value(serde_json::json!({"type": "file", "base_dir": "/srv/niveria"})).unwrap();
        assert_eq!(
            store,
            StoreConfig::File {
                base_dir: PathBuf::from("/srv/niveria")
            }
        );

        let level: LogLevel = "WARNING".parse().unwrap();
        assert_eq!(level, LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
