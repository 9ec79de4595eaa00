//! Lifecycle orchestration.
//!
//! [`NiveriaRuntime`] owns the [`CapabilityContext`] and the background
//! flusher. Nothing is global: plugins receive the context (or the runtime)
//! from whoever built it.
//!
//! ```rust,ignore
//! use niveria_runtime::NiveriaRuntime;
//!
//! let runtime = NiveriaRuntime::builder()
//!     .config_file("config/niveria.toml")
//!     .profile("production")
//!     .build()?;
//!
//! runtime.context().registry().register(luckperms_descriptor);
//! runtime.run().await?;
//! ```

use std::path::Path;
use std::sync::Arc;

use niveria_core::DocumentStore;
use niveria_framework::{BuiltinProfiles, CapabilityContext, FlushReport, MemoryStore};
use tokio::signal;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ConfigLoader, NiveriaConfig, StoreConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

struct Running {
    shutdown: CancellationToken,
    flusher: JoinHandle<FlushReport>,
}

/// Owns the capability context and drives persistence in the background.
pub struct NiveriaRuntime {
    config: NiveriaConfig,
    context: Arc<CapabilityContext>,
    profiles: BuiltinProfiles,
    running: Mutex<Option<Running>>,
}

impl NiveriaRuntime {
    /// Creates a runtime builder that searches the current directory.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from already-loaded configuration.
    ///
    /// Initializes logging, then builds the configured document store and
    /// the context.
    pub fn from_config(config: &NiveriaConfig) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);
        let store = build_store(&config.persistence.store)?;
        Ok(Self::assemble(config.clone(), store, BuiltinProfiles::new()))
    }

    fn assemble(config: NiveriaConfig, store: Arc<dyn DocumentStore>, profiles: BuiltinProfiles) -> Self {
        let context = CapabilityContext::builder()
            .store(store)
            .cache(config.cache.to_settings())
            .persistence(config.persistence.to_settings())
            .registry(config.providers.to_registry_settings())
            .pool(config.providers.to_pool_settings())
            .build();

        info!(
            store = %context.gateway().store_name(),
            cache_capacity = config.cache.capacity,
            tie_break = ?config.providers.tie_break,
            "Runtime initialized from configuration"
        );

        Self {
            config,
            context,
            profiles,
            running: Mutex::new(None),
        }
    }

    /// The loaded configuration.
    pub fn config(&self) -> &NiveriaConfig {
        &self.config
    }

    /// The capability context handed to plugins.
    pub fn context(&self) -> &Arc<CapabilityContext> {
        &self.context
    }

    /// Returns whether the flusher is running.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Registers the builtin profile provider and spawns the flusher.
    ///
    /// Starting twice is a no-op.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("Runtime is already running");
            return;
        }

        self.context.register_builtin_profiles(self.profiles.clone());

        let shutdown = CancellationToken::new();
        let flusher = self.context.gateway().spawn_flusher(shutdown.clone());
        *running = Some(Running { shutdown, flusher });

        info!(
            flush_interval_ms = self.config.persistence.flush_interval_ms,
            "Niveria runtime started"
        );
    }

    /// Stops the runtime.
    ///
    /// Cancels every player session, stops the flusher and waits for its
    /// final flush, which ignores backoff. Returns that flush's report.
    pub async fn shutdown(&self) -> RuntimeResult<FlushReport> {
        let Some(Running { shutdown, flusher }) = self.running.lock().await.take() else {
            warn!("Runtime is not running");
            return Ok(FlushReport::default());
        };

        let sessions = self.context.sessions().close_all();
        info!(sessions, "Stopping Niveria runtime");

        shutdown.cancel();
        let report = flusher.await.map_err(|e| RuntimeError::Flusher(e.to_string()))?;

        let queue = self.context.gateway().queue_stats();
        if queue.pending + queue.failed > 0 {
            warn!(
                pending = queue.pending,
                failed = queue.failed,
                "Runtime stopped with writes the store never acknowledged"
            );
        } else {
            info!(written = report.written, "Runtime stopped");
        }

        Ok(report)
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<FlushReport> {
        self.start().await;
        info!("Niveria runtime is now running. Press Ctrl+C to stop.");
        wait_for_shutdown().await;
        self.shutdown().await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<FlushReport>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start().await;
        shutdown.await;
        self.shutdown().await
    }
}

fn build_store(config: &StoreConfig) -> RuntimeResult<Arc<dyn DocumentStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "file-store")]
        StoreConfig::File { base_dir } => {
            info!(base_dir = %base_dir.display(), "Using file document store");
            Ok(Arc::new(niveria_framework::FileStore::new(base_dir)))
        }
        #[cfg(not(feature = "file-store"))]
        StoreConfig::File { .. } => Err(crate::config::ConfigError::validation(
            "persistence.store.type = \"file\" requires the `file-store` feature",
        )
        .into()),
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = signal::ctrl_c() => log_ctrl_c(result),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Cannot listen for SIGTERM, waiting for Ctrl+C only"),
        }
    }

    log_ctrl_c(signal::ctrl_c().await);
}

fn log_ctrl_c(result: std::io::Result<()>) {
    match result {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`NiveriaRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    store: Option<Arc<dyn DocumentStore>>,
    profiles: BuiltinProfiles,
    init_logging: bool,
}

impl RuntimeBuilder {
    /// Creates a builder that searches the current directory for config.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            store: None,
            profiles: BuiltinProfiles::new(),
            init_logging: true,
        }
    }

    /// Loads exactly this configuration file.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables `NIVERIA_*` environment overrides.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Layers programmatic values over the built-in defaults.
    pub fn merge(mut self, config: NiveriaConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses this store instead of the one named in configuration.
    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the builtin profile provider (e.g. custom default documents).
    pub fn profiles(mut self, profiles: BuiltinProfiles) -> Self {
        self.profiles = profiles;
        self
    }

    /// Leaves the global subscriber alone; for hosts that install their own.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    /// Loads configuration and builds the runtime.
    pub fn build(self) -> RuntimeResult<NiveriaRuntime> {
        let config = self.config_loader.load()?;
        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let store = match self.store {
            Some(store) => store,
            None => build_store(&config.persistence.store)?,
        };
        Ok(NiveriaRuntime::assemble(config, store, self.profiles))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
