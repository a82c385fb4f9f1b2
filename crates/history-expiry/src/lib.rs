pub mod client;
pub mod config;
pub mod deletion_info;
pub mod expire_backend;
pub mod metrics;
pub mod notifier;
pub mod readers;
pub mod scheduler;

pub use client::{HistoryBackendClient, InMemoryBookmarks};
pub use config::ExpiryConfig;
pub use deletion_info::{DeletionInfo, DeletionReason, DeletionTimeRange};
pub use expire_backend::{DeleteEffects, ExpireHistoryBackend};
pub use metrics::ExpiryMetrics;
pub use notifier::{HistoryBackendNotifier, TracingNotifier, VisitUpdateReason};
pub use readers::{AllVisitsReader, AutoSubframeVisitsReader, ExpiringVisitsReader};
pub use scheduler::{ExpiryScheduler, SchedulerHandle};

use history_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryExpiryError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Invalid expiry configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HistoryExpiryError>;
