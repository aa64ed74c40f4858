use std::time::Duration;

pub const MAX_CONFLICT_RETRIES_ENV: &str = "STOREFRONT_MAX_CONFLICT_RETRIES";
pub const TRANSACTION_TIMEOUT_ENV: &str = "STOREFRONT_TRANSACTION_TIMEOUT_MS";

/// Tuning for the order transaction coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Extra attempts after a concurrency conflict before giving up with `Conflict`.
    pub max_conflict_retries: u32,
    /// Wall-clock budget for one operation, retries included.
    pub transaction_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            transaction_timeout: Duration::from_millis(5_000),
        }
    }
}

impl CoordinatorConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source. Unparseable values keep the
    /// default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(MAX_CONFLICT_RETRIES_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(v) => config.max_conflict_retries = v,
                Err(_) => tracing::warn!(
                    key = MAX_CONFLICT_RETRIES_ENV,
                    value = %raw,
                    "ignoring invalid value"
                ),
            }
        }

        if let Some(raw) = lookup(TRANSACTION_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.transaction_timeout = Duration::from_millis(ms),
                _ => tracing::warn!(
                    key = TRANSACTION_TIMEOUT_ENV,
                    value = %raw,
                    "ignoring invalid value"
                ),
            }
        }

        config
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }
}
