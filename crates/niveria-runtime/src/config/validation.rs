//! Configuration validation utilities.

use std::str::FromStr;

use niveria_core::CapabilityKind;

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    CacheConfig, LogOutput, LoggingConfig, NiveriaConfig, PersistenceConfig, ProvidersConfig,
    RetryConfig,
};

/// Validates the entire configuration.
///
/// Unknown log levels never get this far: they fail extraction with
/// [`ConfigError::ParseError`].
pub fn validate_config(config: &NiveriaConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_cache_config(&config.cache)?;
    validate_persistence_config(&config.persistence)?;
    validate_providers_config(&config.providers)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if logging.filters.keys().any(|module| module.trim().is_empty()) {
        return Err(ConfigError::validation("Log filter module names must not be empty"));
    }

    Ok(())
}

fn validate_cache_config(cache: &CacheConfig) -> ConfigResult<()> {
    if cache.capacity == 0 {
        return Err(ConfigError::validation("Cache capacity must be greater than 0"));
    }

    if cache.default_ttl_ms == 0 {
        return Err(ConfigError::validation("Default cache TTL must be greater than 0"));
    }

    for (name, ttl) in &cache.ttl_ms {
        let kind = CapabilityKind::from_str(name).map_err(ConfigError::validation)?;
        if *ttl == 0 {
            return Err(ConfigError::validation(format!(
                "Cache TTL for {kind} must be greater than 0"
            )));
        }
    }

    Ok(())
}

fn validate_persistence_config(persistence: &PersistenceConfig) -> ConfigResult<()> {
    if persistence.batch_size == 0 {
        return Err(ConfigError::validation("Batch size must be greater than 0"));
    }

    if persistence.flush_interval_ms == 0 {
        return Err(ConfigError::validation("Flush interval must be greater than 0"));
    }

    if persistence.timeout_ms == 0 {
        return Err(ConfigError::validation("Store timeout must be greater than 0"));
    }

    if persistence.connectivity_check_ms == 0 {
        return Err(ConfigError::validation(
            "Connectivity check interval must be greater than 0",
        ));
    }

    validate_retry_config(&persistence.retry)
}

fn validate_retry_config(retry: &RetryConfig) -> ConfigResult<()> {
    if retry.max_attempts == 0 {
        return Err(ConfigError::validation("Max attempts must be greater than 0"));
    }

    if retry.initial_delay_ms == 0 {
        return Err(ConfigError::validation(
            "Initial retry delay must be greater than 0",
        ));
    }

    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::validation(
            "Max retry delay must be greater than or equal to initial delay",
        ));
    }

    if retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::validation(
            "Backoff multiplier must be at least 1.0",
        ));
    }

    Ok(())
}

fn validate_providers_config(providers: &ProvidersConfig) -> ConfigResult<()> {
    if providers.call_timeout_ms == 0 {
        return Err(ConfigError::validation("Provider call timeout must be greater than 0"));
    }

    if providers.max_concurrent_calls == 0 {
        return Err(ConfigError::validation(
            "Max concurrent provider calls must be greater than 0",
        ));
    }

    if let Some(name) = providers.disabled.iter().find(|name| name.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Disabled provider name must not be empty: {name:?}"
        )));
    }

    Ok(())
}
