//! Custodian configuration.
//!
//! Every field has a default, so a partial JSON document is a valid config:
//!
//! ```json
//! {"envelope": {"max_plaintext_len": 1048576}, "fetch_retry": {"max_attempts": 3}}
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use custody_perms::EnvelopeConfig;

use crate::error::{CustodyError, Result};

/// Configuration for the Custodian.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodyConfig {
    /// Envelope cipher limits.
    pub envelope: EnvelopeConfig,
    /// Backoff for content fetches that come back `NotFound`.
    pub fetch_retry: RetryPolicy,
}

impl CustodyConfig {
    /// Parse a config from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CustodyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.envelope.max_plaintext_len == 0 {
            return Err(CustodyError::Config(
                "envelope.max_plaintext_len must be positive".into(),
            ));
        }
        self.fetch_retry.validate()
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff_ms: u64,
    /// Ceiling for any single delay.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (0-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(CustodyError::Config(
                "fetch_retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(CustodyError::Config(format!(
                "fetch_retry.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }
}
