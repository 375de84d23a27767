use std::time::Duration;

use serde::Deserialize;

use dealsync_core::Table;

use crate::error::ConfigError;

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_DEFERRED_RETRY_MS: u64 = 2_500;
const DEFAULT_MAX_DEFERRED_RETRIES: u32 = 8;
const DEFAULT_PENDING_GRACE_MS: u64 = 2_000;
const DEFAULT_WRITE_RETRY_ATTEMPTS: u32 = 2;
const DEFAULT_WRITE_RETRY_BACKOFF_MS: u64 = 100;

/// Timing and retry knobs for the mutation and reconciliation paths.
///
/// Every field is optional in TOML; missing keys take the defaults below.
///
/// ```toml
/// debounce_ms = 300
/// deferred_retry_ms = 2500
/// max_deferred_retries = 8
/// pending_grace_ms = 2000
/// tracked_tables = ["deals", "deal_lenders"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Quiet period that coalesces a burst of change signals into one refetch.
    pub debounce_ms: u64,
    /// Delay between re-checks while local writes are still pending.
    pub deferred_retry_ms: u64,
    /// Re-checks before a refetch is forced regardless of pending writes.
    pub max_deferred_retries: u32,
    /// How long an entity stays in the pending registry after its write resolves.
    pub pending_grace_ms: u64,
    /// Extra attempts for a durable write that failed with a transient error.
    pub write_retry_attempts: u32,
    pub write_retry_backoff_ms: u64,
    pub tracked_tables: Vec<Table>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            deferred_retry_ms: DEFAULT_DEFERRED_RETRY_MS,
            max_deferred_retries: DEFAULT_MAX_DEFERRED_RETRIES,
            pending_grace_ms: DEFAULT_PENDING_GRACE_MS,
            write_retry_attempts: DEFAULT_WRITE_RETRY_ATTEMPTS,
            write_retry_backoff_ms: DEFAULT_WRITE_RETRY_BACKOFF_MS,
            tracked_tables: vec![Table::Deals, Table::DealLenders],
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == 0 {
            return Err(ConfigError::Invalid("debounce_ms must be positive".into()));
        }
        if self.deferred_retry_ms == 0 {
            return Err(ConfigError::Invalid("deferred_retry_ms must be positive".into()));
        }
        if self.tracked_tables.is_empty() {
            return Err(ConfigError::Invalid("tracked_tables must name at least one table".into()));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn deferred_retry(&self) -> Duration {
        Duration::from_millis(self.deferred_retry_ms)
    }

    pub fn pending_grace(&self) -> Duration {
        Duration::from_millis(self.pending_grace_ms)
    }

    pub fn write_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.write_retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.deferred_retry(), Duration::from_millis(2_500));
        assert_eq!(config.pending_grace(), Duration::from_secs(2));
    }

    #[test]
    fn partial_toml_overrides_named_keys() {
        let config = EngineConfig::from_toml_str(
            r#"
            debounce_ms = 50
            max_deferred_retries = 3
            tracked_tables = ["deal_lenders"]
            "#,
        )
        .unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.max_deferred_retries, 3);
        assert_eq!(config.tracked_tables, vec![Table::DealLenders]);
        assert_eq!(config.pending_grace_ms, DEFAULT_PENDING_GRACE_MS);
    }

    #[test]
    fn zero_debounce_is_rejected() {
        let err = EngineConfig::from_toml_str("debounce_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_table_fails_to_parse() {
        let err = EngineConfig::from_toml_str(r#"tracked_tables = ["contacts"]"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn unknown_key_fails_to_parse() {
        assert!(EngineConfig::from_toml_str("debounce = 10").is_err());
    }
}
