use history_types::time::{days, hours};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{HistoryExpiryError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    /// Run the background sweep
    pub auto_expiry: bool,
    /// Visits older than this many days are expired by the sweep
    pub expire_days_threshold: u64,
    /// Visits read per background batch
    pub num_expire_per_iteration: usize,
    /// Delay between batches while a sweep has work left
    pub expiration_delay_secs: u64,
    /// Delay before restarting the sweep once every reader is exhausted
    pub expiration_empty_delay_secs: u64,
    /// On-demand favicons not requested for this many days are deleted
    pub on_demand_favicon_is_old_after_days: u64,
    /// Minimum spacing between two on-demand favicon sweeps
    pub clear_on_demand_favicons_interval_hours: u64,
    /// Visits per batch when expiring everything before a time
    pub expire_batch_size: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            auto_expiry: true,
            expire_days_threshold: 90,
            num_expire_per_iteration: 32,
            expiration_delay_secs: 60,
            expiration_empty_delay_secs: 5 * 60,
            on_demand_favicon_is_old_after_days: 30,
            clear_on_demand_favicons_interval_hours: 24,
            expire_batch_size: 1000,
        }
    }
}

impl ExpiryConfig {
    pub fn expiration_threshold(&self) -> Duration {
        days(self.expire_days_threshold)
    }

    pub fn expiration_delay(&self) -> Duration {
        Duration::from_secs(self.expiration_delay_secs)
    }

    pub fn expiration_empty_delay(&self) -> Duration {
        Duration::from_secs(self.expiration_empty_delay_secs)
    }

    pub fn on_demand_favicon_age(&self) -> Duration {
        days(self.on_demand_favicon_is_old_after_days)
    }

    pub fn clear_on_demand_favicons_interval(&self) -> Duration {
        hours(self.clear_on_demand_favicons_interval_hours)
    }

    pub fn validate(&self) -> Result<()> {
        if self.expire_days_threshold == 0 {
            return Err(HistoryExpiryError::Config(
                "expire_days_threshold must be greater than 0".to_string(),
            ));
        }
        if self.num_expire_per_iteration == 0 || self.expire_batch_size == 0 {
            return Err(HistoryExpiryError::Config(
                "batch sizes must be greater than 0".to_string(),
            ));
        }
        if self.expiration_delay_secs == 0 {
            return Err(HistoryExpiryError::Config(
                "expiration_delay_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
