//! Bounded pool for provider calls.
//!
//! Every adapter call goes through [`WorkerPool::run`], which caps the
//! number of concurrent provider calls and bounds each one with a timeout.
//! Adapter errors are tagged with the provider name on the way out.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use niveria_core::{CapabilityError, CapabilityResult, ProviderResult};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Concurrency and timeout limits for provider calls.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum provider calls in flight at once.
    pub max_concurrent: usize,
    /// Time budget of a single provider call.
    pub call_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Semaphore-bounded executor for adapter calls. Cheap to clone.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    call_timeout: Duration,
}

impl WorkerPool {
    /// Creates a pool from settings; a zero concurrency limit is raised to 1.
    pub fn new(settings: &PoolSettings) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            call_timeout: settings.call_timeout,
        }
    }

    /// Runs one provider call under a permit and the call timeout.
    pub async fn run<T, F>(&self, provider: &str, call: F) -> CapabilityResult<T>
    where
        F: Future<Output = ProviderResult<T>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CapabilityError::Cancelled)?;

        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                debug!(provider = %provider, error = %err, "Provider call failed");
                Err(err.into_capability(provider))
            }
            Err(_) => {
                warn!(provider = %provider, timeout = ?self.call_timeout, "Provider call timed out");
                Err(CapabilityError::ProviderTimeout {
                    provider: provider.to_string(),
                    after: self.call_timeout,
                })
            }
        }
    }

    /// Permits currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// The per-call time budget.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use niveria_core::ProviderError;

    fn pool(max_concurrent: usize, timeout_ms: u64) -> WorkerPool {
        WorkerPool::new(&PoolSettings {
            max_concurrent,
            call_timeout: Duration::from_millis(timeout_ms),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let pool = pool(2, 50);
        let result: CapabilityResult<()> = pool
            .run("slowpoke", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(CapabilityError::ProviderTimeout { ref provider, .. }) if provider == "slowpoke"
        ));
        assert_eq!(pool.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_errors_are_tagged_with_provider() {
        let pool = pool(1, 1000);
        let result: CapabilityResult<bool> = pool
            .run("Lands", async { Err(ProviderError::rejected("no such land")) })
            .await;
        assert!(matches!(
            result,
            Err(CapabilityError::ProviderError { ref provider, .. }) if provider == "Lands"
        ));
        assert_eq!(pool.run("Lands", async { Ok(7) }).await.unwrap(), 7);
    }
}
