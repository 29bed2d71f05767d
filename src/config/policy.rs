//! Lease durations, retry ceilings and job intervals.

use std::path::Path;

use chrono::TimeDelta;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::Domain;

/// Longest lease either domain may be configured with (7 days).
pub const MAX_LEASE_SECS: u64 = 7 * 24 * 60 * 60;

/// Engine tuning. Every field has a default, so an empty TOML file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnginePolicy {
    /// Review lease length.
    pub review_lease_secs: u64,
    /// Call lease length; also the stuck-call staleness threshold.
    pub call_lease_secs: u64,
    /// Attempts before a call entry is abandoned.
    pub call_retry_ceiling: u32,
    /// Ranked rows `request_work` tries before giving up.
    pub max_selection_attempts: usize,
    /// Treat an empty partition set as "all partitions".
    pub allow_unrestricted_when_empty: bool,
    pub sweep_interval_secs: u64,
    pub view_refresh_interval_secs: u64,
    pub upload_retry_interval_secs: u64,
    pub max_upload_attempts: u32,
    pub upload_batch_size: usize,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            review_lease_secs: 30 * 60,
            call_lease_secs: 30 * 60,
            call_retry_ceiling: 3,
            max_selection_attempts: 5,
            allow_unrestricted_when_empty: true,
            sweep_interval_secs: 60,
            view_refresh_interval_secs: 60,
            upload_retry_interval_secs: 5 * 60,
            max_upload_attempts: 5,
            upload_batch_size: 50,
        }
    }
}

impl EnginePolicy {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read policy {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let policy: EnginePolicy = toml::from_str(content)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.review_lease_secs == 0 || self.call_lease_secs == 0 {
            return Err(Error::Config("lease durations must be positive".to_string()));
        }
        if self.review_lease_secs > MAX_LEASE_SECS || self.call_lease_secs > MAX_LEASE_SECS {
            return Err(Error::Config(format!(
                "lease durations must not exceed {MAX_LEASE_SECS} seconds"
            )));
        }
        if self.call_retry_ceiling == 0 {
            return Err(Error::Config("call_retry_ceiling must be at least 1".to_string()));
        }
        if self.max_selection_attempts == 0 {
            return Err(Error::Config(
                "max_selection_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_upload_attempts == 0 || self.upload_batch_size == 0 {
            return Err(Error::Config(
                "upload attempts and batch size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Lease length for `domain`, capped at [`MAX_LEASE_SECS`] for policies
    /// built in code without `validate`.
    pub fn lease_duration(&self, domain: Domain) -> TimeDelta {
        let secs = match domain {
            Domain::Review => self.review_lease_secs,
            Domain::Call => self.call_lease_secs,
        };
        TimeDelta::seconds(secs.min(MAX_LEASE_SECS) as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn view_refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.view_refresh_interval_secs.max(1))
    }

    pub fn upload_retry_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.upload_retry_interval_secs.max(1))
    }
}
