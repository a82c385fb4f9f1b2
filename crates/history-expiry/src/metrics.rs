use prometheus::{IntCounter, Opts, Registry};

use crate::Result;

/// Counters describing what the expiration engine removed.
#[derive(Clone)]
pub struct ExpiryMetrics {
    pub visits_expired: IntCounter,
    pub urls_deleted: IntCounter,
    pub urls_modified: IntCounter,
    pub favicons_deleted: IntCounter,
    pub batches: IntCounter,
    pub store_errors: IntCounter,
}

impl ExpiryMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        Self::with_prefix(registry, "history")
    }

    pub fn with_prefix(registry: &Registry, prefix: &str) -> Result<Self> {
        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let counter = IntCounter::with_opts(Opts::new(name, help).namespace(prefix))?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            visits_expired: counter(
                "expiry_visits_expired_total",
                "Visits deleted by expiration",
            )?,
            urls_deleted: counter("expiry_urls_deleted_total", "URL rows deleted")?,
            urls_modified: counter(
                "expiry_urls_modified_total",
                "URL rows updated after losing visits",
            )?,
            favicons_deleted: counter(
                "expiry_favicons_deleted_total",
                "Orphaned or old favicons deleted",
            )?,
            batches: counter("expiry_batches_total", "Background expiration batches run")?,
            store_errors: counter(
                "expiry_store_errors_total",
                "Expiration operations aborted by a store error",
            )?,
        })
    }
}
