use anyhow::{Context, Result};
use history_expiry::{
    DeletionReason, ExpireHistoryBackend, ExpiryMetrics, ExpiryScheduler, HistoryBackendNotifier,
    HistoryExpiryError, InMemoryBookmarks, SchedulerHandle, TracingNotifier,
};
use history_storage::{
    Database, FaviconDatabase, FaviconStore, HistoryDatabase, HistoryStore, MemoryDatabase,
    RocksDatabase,
};
use history_types::{
    FaviconBitmapType, FaviconId, IconType, PageTransition, PixelSize, Time, UrlRow, VisitRow,
};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::config::Config;

/// One entry of a batched `expire_history` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpireHistoryArgs {
    pub urls: BTreeSet<String>,
    pub begin_time: Time,
    pub end_time: Time,
}

impl ExpireHistoryArgs {
    /// Every visit on the UTC day containing `time`.
    pub fn for_day(time: Time) -> Self {
        let day = history_types::time::days(1);
        let micros = i64::try_from(day.as_micros()).unwrap_or(i64::MAX);
        let begin = time.to_internal_value() - time.to_internal_value().rem_euclid(micros);
        Self {
            urls: BTreeSet::new(),
            begin_time: Time::from_internal_value(begin),
            end_time: Time::from_internal_value(begin) + day,
        }
    }
}

/// Row counts reported by `inspect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub urls: usize,
    pub visits: usize,
    pub favicons: usize,
    pub early_expiration_threshold: i64,
}

/// Owns the stores, the bookmark oracle and the expiration engine, and
/// serializes every history mutation through one engine lock.
pub struct HistoryService<D: Database + 'static> {
    config: Config,
    main_db: Arc<HistoryDatabase<D>>,
    favicon_db: Arc<FaviconDatabase<D>>,
    bookmarks: Arc<InMemoryBookmarks>,
    backend: Arc<Mutex<ExpireHistoryBackend>>,
    registry: Registry,
    metrics: Option<ExpiryMetrics>,
    scheduler: Option<SchedulerHandle>,
}

impl HistoryService<RocksDatabase> {
    /// Opens (creating if needed) the RocksDB stores under the data dir.
    pub fn open(config: Config) -> Result<Self> {
        let datadir = &config.database.datadir;
        fs::create_dir_all(datadir)
            .with_context(|| format!("Failed to create data directory {}", datadir.display()))?;

        let options = config.database.rocks_options();
        let history = RocksDatabase::open_with(config.database.history_path(), &options)
            .context("Failed to open history database")?;
        let favicons = RocksDatabase::open_with(config.database.favicons_path(), &options)
            .context("Failed to open favicon database")?;
        info!("Opened history stores at {}", datadir.display());

        Self::from_databases(
            config,
            Arc::new(history),
            Arc::new(favicons),
            Arc::new(TracingNotifier),
        )
    }
}

impl HistoryService<MemoryDatabase> {
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::in_memory_with_notifier(config, Arc::new(TracingNotifier))
    }

    pub fn in_memory_with_notifier(
        config: Config,
        notifier: Arc<dyn HistoryBackendNotifier>,
    ) -> Result<Self> {
        Self::from_databases(
            config,
            Arc::new(MemoryDatabase::new()),
            Arc::new(MemoryDatabase::new()),
            notifier,
        )
    }
}

impl<D: Database + 'static> HistoryService<D> {
    pub fn from_databases(
        config: Config,
        history: Arc<D>,
        favicons: Arc<D>,
        notifier: Arc<dyn HistoryBackendNotifier>,
    ) -> Result<Self> {
        config.validate()?;

        let bookmarks = match &config.bookmarks.file {
            Some(path) => {
                let text = fs::read_to_string(path).with_context(|| {
                    format!("Failed to read bookmarks file {}", path.display())
                })?;
                InMemoryBookmarks::parse(&text)
            }
            None => InMemoryBookmarks::new(),
        };
        let bookmarks = Arc::new(bookmarks);
        debug!(count = bookmarks.len(), "Loaded bookmarks");

        let main_db = Arc::new(HistoryDatabase::new(history));
        let favicon_db = Arc::new(FaviconDatabase::new(favicons));

        let registry = Registry::new();
        let metrics = if config.metrics.enabled {
            Some(ExpiryMetrics::with_prefix(&registry, &config.metrics.prefix)?)
        } else {
            None
        };

        let mut backend =
            ExpireHistoryBackend::new(notifier, Some(bookmarks.clone()), config.expiry.clone());
        if let Some(metrics) = &metrics {
            backend = backend.with_metrics(metrics.clone());
        }
        backend.set_databases(Some(main_db.clone()), Some(favicon_db.clone()));

        Ok(Self {
            config,
            main_db,
            favicon_db,
            bookmarks,
            backend: Arc::new(Mutex::new(backend)),
            registry,
            metrics,
            scheduler: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn main_db(&self) -> &Arc<HistoryDatabase<D>> {
        &self.main_db
    }

    pub fn favicon_db(&self) -> &Arc<FaviconDatabase<D>> {
        &self.favicon_db
    }

    pub fn bookmarks(&self) -> &Arc<InMemoryBookmarks> {
        &self.bookmarks
    }

    pub fn metrics(&self) -> Option<&ExpiryMetrics> {
        self.metrics.as_ref()
    }

    pub fn backend(&self) -> &Arc<Mutex<ExpireHistoryBackend>> {
        &self.backend
    }

    fn lock_backend(&self) -> Result<MutexGuard<'_, ExpireHistoryBackend>> {
        self.backend
            .lock()
            .map_err(|_| HistoryExpiryError::Scheduler("expiration backend lock poisoned".into()))
            .map_err(Into::into)
    }

    /// Records a navigation, creating the URL row on first visit. A visit
    /// that is not a redirect is a chain of its own, so its referrer is never
    /// treated as a redirect hop.
    pub fn record_visit(
        &self,
        url: &str,
        time: Time,
        transition: PageTransition,
        referring_visit: Option<i64>,
    ) -> Result<VisitRow> {
        // Hold the engine lock so a sweep never sees a half-recorded visit.
        let _backend = self.lock_backend()?;
        let db = self.main_db.as_ref();

        let mut row = match db.get_row_for_url(url)? {
            Some(row) => row,
            None => {
                let id = db.add_url(&UrlRow::new(url))?;
                UrlRow::with_id(id, url)
            }
        };

        let transition = if transition.is_redirect() {
            transition
        } else {
            transition.with_qualifiers(PageTransition::CHAIN_START | PageTransition::CHAIN_END)
        };
        let typed = transition.core_type_is(PageTransition::TYPED) && !transition.is_redirect();
        let mut visit = VisitRow::new(row.id, time, referring_visit, transition, typed);
        db.add_visit(&mut visit)?;

        row.visit_count += 1;
        if typed {
            row.typed_count += 1;
        }
        row.last_visit = std::cmp::max(row.last_visit, time);
        db.update_url_row(&row)?;

        debug!(url, visit_id = visit.id, %transition, "Recorded visit");
        Ok(visit)
    }

    /// Stores a favicon for `page_url` and maps the page to it.
    pub fn set_favicon(
        &self,
        page_url: &str,
        icon_url: &str,
        bitmap_type: FaviconBitmapType,
        time: Time,
    ) -> Result<FaviconId> {
        let _backend = self.lock_backend()?;
        let icon_id = self.favicon_db.add_favicon_with_bitmap(
            icon_url,
            IconType::Favicon,
            Vec::new(),
            bitmap_type,
            time,
            PixelSize::new(16, 16),
        )?;
        self.favicon_db.add_icon_mapping(page_url, icon_id)?;
        Ok(icon_id)
    }

    pub fn delete_url(&self, url: &str) -> Result<()> {
        self.lock_backend()?.delete_url(url, Time::max());
        Ok(())
    }

    pub fn delete_urls(&self, urls: &[String]) -> Result<()> {
        self.lock_backend()?.delete_urls(urls, Time::max());
        Ok(())
    }

    /// Deletes each URL's visits up to its paired time.
    pub fn delete_urls_until(&self, urls_and_times: &[(String, Time)]) -> Result<()> {
        let backend = self.lock_backend()?;
        for (url, end_time) in urls_and_times {
            backend.delete_url(url, *end_time);
        }
        Ok(())
    }

    pub fn expire_history_between(
        &self,
        restrict_urls: &BTreeSet<String>,
        begin_time: Time,
        end_time: Time,
        user_initiated: bool,
    ) -> Result<()> {
        self.lock_backend()?
            .expire_history_between(restrict_urls, begin_time, end_time, user_initiated);
        Ok(())
    }

    pub fn expire_history(&self, requests: &[ExpireHistoryArgs]) -> Result<()> {
        let backend = self.lock_backend()?;
        for request in requests {
            backend.expire_history_between(
                &request.urls,
                request.begin_time,
                request.end_time,
                true,
            );
        }
        Ok(())
    }

    pub fn expire_history_for_times(&self, times: &[Time]) -> Result<()> {
        self.lock_backend()?.expire_history_for_times(times);
        Ok(())
    }

    pub fn remove_visits(&self, visits: &[VisitRow], reason: DeletionReason) -> Result<()> {
        self.lock_backend()?.expire_visits(visits, reason);
        Ok(())
    }

    pub fn expire_history_before(&self, end_time: Time) -> Result<()> {
        self.lock_backend()?.expire_history_before(end_time);
        Ok(())
    }

    /// Forgets the bookmarks and drops the URLs that were only kept for
    /// them, together with their icons.
    pub fn urls_no_longer_bookmarked(&self, urls: &[String]) -> Result<()> {
        for url in urls {
            self.bookmarks.remove_bookmark(url);
        }

        let backend = self.lock_backend()?;
        for url in urls {
            let has_visits = match self.main_db.get_row_for_url(url)? {
                Some(row) => !self.main_db.get_visits_for_url(row.id)?.is_empty(),
                None => false,
            };
            if !has_visits {
                backend.delete_url(url, Time::max());
            }
        }
        Ok(())
    }

    /// Runs the on-demand favicon sweep relative to `now`.
    pub fn clear_old_on_demand_favicons(&self, now: Time) -> Result<()> {
        let threshold = now - self.config.expiry.on_demand_favicon_age();
        self.lock_backend()?
            .clear_old_on_demand_favicons_if_possible(threshold);
        Ok(())
    }

    pub fn is_expired_visit_time(&self, time: Time) -> Result<bool> {
        Ok(self.lock_backend()?.is_expired_visit_time(time, Time::now()))
    }

    /// Starts the background sweep unless it is disabled or running.
    pub fn start_expiration(&mut self) -> Result<bool> {
        if !self.config.expiry.auto_expiry {
            info!("Automatic history expiration is disabled");
            return Ok(false);
        }
        if self.scheduler.is_some() {
            return Ok(false);
        }

        let scheduler = ExpiryScheduler::new(self.backend.clone())?;
        self.scheduler = Some(scheduler.start());
        Ok(true)
    }

    pub async fn stop_expiration(&mut self) -> Result<()> {
        if let Some(handle) = self.scheduler.take() {
            handle.stop().await?;
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<HistoryStats> {
        Ok(HistoryStats {
            urls: self.main_db.url_count()?,
            visits: self.main_db.visit_count()?,
            favicons: self.favicon_db.favicon_count()?,
            early_expiration_threshold: self
                .main_db
                .get_early_expiration_threshold()?
                .to_internal_value(),
        })
    }

    /// Prometheus text exposition of the expiration counters.
    pub fn gather_metrics(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics are not valid UTF-8")
    }
}
