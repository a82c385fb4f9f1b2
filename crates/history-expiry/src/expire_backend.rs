//! Deletion and aging of history rows.
//!
//! `ExpireHistoryBackend` removes visits, the URL rows left without visits
//! and the favicons left without mappings, then reports what changed to a
//! `HistoryBackendNotifier`. Each operation runs in one transaction per
//! store. A store failure rolls the operation back before any notification
//! is sent; failures are logged and counted, never returned.

use history_storage::{FaviconStore, HistoryStore, Result as StorageResult};
use history_types::{FaviconId, Time, UrlId, UrlRow, VisitId, VisitRow};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::HistoryBackendClient;
use crate::config::ExpiryConfig;
use crate::deletion_info::{DeletionInfo, DeletionReason, DeletionTimeRange};
use crate::metrics::ExpiryMetrics;
use crate::notifier::{HistoryBackendNotifier, VisitUpdateReason};
use crate::readers::{AllVisitsReader, ExpiringVisitsReader};

/// Everything touched while servicing one expiration request.
#[derive(Debug, Default, Clone)]
pub struct DeleteEffects {
    /// Rows of URLs that lost at least one visit, as they were before.
    pub affected_urls: BTreeMap<UrlId, UrlRow>,
    /// Favicons that lost at least one mapping.
    pub affected_favicons: BTreeSet<FaviconId>,
    /// URL rows kept with updated counts.
    pub modified_urls: Vec<UrlRow>,
    pub deleted_urls: Vec<UrlRow>,
    /// Icon URLs of the favicons actually removed.
    pub deleted_favicons: BTreeSet<String>,
    pub deleted_visits: Vec<VisitRow>,
    /// Visits re-pointed at a new referrer, keyed by id.
    pub updated_visits: BTreeMap<VisitId, VisitRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeletionType {
    UserInitiated,
    Expired,
}

pub struct ExpireHistoryBackend {
    notifier: Arc<dyn HistoryBackendNotifier>,
    backend_client: Option<Arc<dyn HistoryBackendClient>>,
    main_db: Option<Arc<dyn HistoryStore>>,
    favicon_db: Option<Arc<dyn FaviconStore>>,
    config: ExpiryConfig,
    metrics: Option<ExpiryMetrics>,
    last_on_demand_expiration_time: Time,
}

impl ExpireHistoryBackend {
    pub fn new(
        notifier: Arc<dyn HistoryBackendNotifier>,
        backend_client: Option<Arc<dyn HistoryBackendClient>>,
        config: ExpiryConfig,
    ) -> Self {
        Self {
            notifier,
            backend_client,
            main_db: None,
            favicon_db: None,
            config,
            metrics: None,
            last_on_demand_expiration_time: Time::null(),
        }
    }

    pub fn with_metrics(mut self, metrics: ExpiryMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Attaches (or detaches, with `None`) the stores. Without a main
    /// database every operation is a no-op.
    pub fn set_databases(
        &mut self,
        main_db: Option<Arc<dyn HistoryStore>>,
        favicon_db: Option<Arc<dyn FaviconStore>>,
    ) {
        self.main_db = main_db;
        self.favicon_db = favicon_db;
    }

    pub fn config(&self) -> &ExpiryConfig {
        &self.config
    }

    pub fn main_db(&self) -> Option<&Arc<dyn HistoryStore>> {
        self.main_db.as_ref()
    }

    pub fn favicon_db(&self) -> Option<&Arc<dyn FaviconStore>> {
        self.favicon_db.as_ref()
    }

    /// Visits before the returned time are old enough to be expired.
    pub fn get_current_expiration_time(&self, now: Time) -> Time {
        now - self.config.expiration_threshold()
    }

    pub fn is_expired_visit_time(&self, time: Time, now: Time) -> bool {
        time < self.get_current_expiration_time(now)
    }

    /// Removes the visits of `url` up to and including `end_time` (null or
    /// max for all of them), and the URL itself once no visit is left.
    pub fn delete_url(&self, url: &str, end_time: Time) {
        self.delete_urls(&[url.to_string()], end_time);
    }

    /// Batched `delete_url`, reported as a single deletion.
    pub fn delete_urls(&self, urls: &[String], end_time: Time) {
        if urls.is_empty() {
            return;
        }
        let effects = self.run("delete_urls", |db, effects| {
            for url in urls {
                self.delete_url_internal(db, url, end_time, effects)?;
            }
            self.delete_favicons_if_possible(effects)
        });

        if let Some(effects) = effects {
            info!(
                urls = urls.len(),
                deleted = effects.deleted_urls.len(),
                "Deleted URLs"
            );
            self.broadcast_notifications(
                effects,
                DeletionType::UserInitiated,
                DeletionTimeRange::invalid(),
                None,
                DeletionReason::Other,
            );
        }
    }

    /// Expires visits with `begin_time <= visit_time < end_time`, restricted
    /// to `restrict_urls` when it is not empty. A null `end_time` means no
    /// upper bound.
    pub fn expire_history_between(
        &self,
        restrict_urls: &BTreeSet<String>,
        begin_time: Time,
        end_time: Time,
        user_initiated: bool,
    ) {
        if !end_time.is_null() && end_time < begin_time {
            debug!(%begin_time, %end_time, "Empty expiration range");
            return;
        }

        let effects = self.run("expire_history_between", |db, effects| {
            let mut visits = db.get_all_visits_in_range(begin_time, end_time, 0)?;
            if !restrict_urls.is_empty() {
                let mut url_ids = HashSet::new();
                for url in restrict_urls {
                    if let Some(row) = db.get_row_for_url(url)? {
                        url_ids.insert(row.id);
                    }
                }
                visits.retain(|visit| url_ids.contains(&visit.url_id));
            }
            self.expire_visits_internal(db, &visits, effects)
        });

        if let Some(effects) = effects {
            let deletion_type = if user_initiated {
                DeletionType::UserInitiated
            } else {
                DeletionType::Expired
            };
            let restrict = (!restrict_urls.is_empty()).then(|| restrict_urls.clone());
            self.broadcast_notifications(
                effects,
                deletion_type,
                DeletionTimeRange::new(begin_time, end_time),
                restrict,
                DeletionReason::Other,
            );
        }
    }

    /// Expires the visits whose time is exactly one of `times`.
    pub fn expire_history_for_times(&self, times: &[Time]) {
        if times.is_empty() {
            return;
        }
        let effects = self.run("expire_history_for_times", |db, effects| {
            let visits = db.get_visits_for_times(times)?;
            self.expire_visits_internal(db, &visits, effects)
        });

        if let Some(effects) = effects {
            self.broadcast_notifications(
                effects,
                DeletionType::UserInitiated,
                DeletionTimeRange::invalid(),
                None,
                DeletionReason::Other,
            );
        }
    }

    /// Expires `visits` together with the redirect hops that led to them.
    pub fn expire_visits(&self, visits: &[VisitRow], reason: DeletionReason) {
        if visits.is_empty() {
            return;
        }
        let effects = self.run("expire_visits", |db, effects| {
            self.expire_visits_internal(db, visits, effects)
        });

        if let Some(effects) = effects {
            self.broadcast_notifications(
                effects,
                DeletionType::UserInitiated,
                DeletionTimeRange::invalid(),
                None,
                reason,
            );
        }
    }

    /// Expires every visit at or before `end_time`, one batch at a time.
    pub fn expire_history_before(&self, end_time: Time) {
        let reader = AllVisitsReader;
        let batch_size = self.config.expire_batch_size;
        let mut batches = 0usize;
        while self.expire_some_old_history(end_time, &reader, batch_size) {
            batches += 1;
        }
        debug!(%end_time, batches = batches + 1, "Expired history before");
    }

    /// Expires at most `max_visits` visits selected by `reader` at or before
    /// `end_time`. Returns true when the batch was full and another one is
    /// likely to find more work.
    pub fn expire_some_old_history(
        &self,
        end_time: Time,
        reader: &dyn ExpiringVisitsReader,
        max_visits: usize,
    ) -> bool {
        if max_visits == 0 {
            return false;
        }

        let mut more = false;
        // Reader ranges exclude their end.
        let effective_end = end_time + history_types::time::microseconds(1);
        let effects = self.run("expire_some_old_history", |db, effects| {
            let mut visits = Vec::new();
            more = reader.read(effective_end, db, &mut visits, max_visits)?;
            self.delete_visit_related_info(db, &visits, effects)?;
            self.expire_urls_for_visits(db, &visits, effects)?;
            self.delete_favicons_if_possible(effects)
        });

        let Some(effects) = effects else {
            return false;
        };
        if let Some(metrics) = &self.metrics {
            metrics.batches.inc();
        }
        debug!(
            reader = reader.name(),
            visits = effects.deleted_visits.len(),
            more,
            "Expired batch"
        );
        self.broadcast_notifications(
            effects,
            DeletionType::Expired,
            DeletionTimeRange::invalid(),
            None,
            DeletionReason::Other,
        );
        more
    }

    /// Deletes the favicons in `effects.affected_favicons` that no page maps
    /// to anymore, recording their icon URLs in `effects.deleted_favicons`.
    pub fn delete_favicons_if_possible(&self, effects: &mut DeleteEffects) -> StorageResult<()> {
        let Some(favicon_db) = self.favicon_db.as_deref() else {
            return Ok(());
        };

        for &icon_id in &effects.affected_favicons {
            if favicon_db.has_mapping_for(icon_id)? {
                continue;
            }
            let Some(header) = favicon_db.get_favicon_header(icon_id)? else {
                continue;
            };
            if favicon_db.delete_favicon(icon_id)? {
                effects.deleted_favicons.insert(header.icon_url);
            }
        }
        Ok(())
    }

    /// Deletes on-demand favicons last requested before `expiration_threshold`
    /// unless a bookmarked page uses them. Runs at most once per configured
    /// interval of threshold advance.
    pub fn clear_old_on_demand_favicons_if_possible(&mut self, expiration_threshold: Time) {
        let Some(favicon_db) = self.favicon_db.clone() else {
            return;
        };
        let next_allowed = self.last_on_demand_expiration_time
            + self.config.clear_on_demand_favicons_interval();
        if expiration_threshold < next_allowed {
            return;
        }
        self.last_on_demand_expiration_time = expiration_threshold;

        let mut effects = DeleteEffects::default();
        let mut changed = Vec::new();
        let result = (|| -> StorageResult<()> {
            favicon_db.begin_transaction()?;
            let old_favicons = favicon_db.get_old_on_demand_favicons(expiration_threshold)?;
            for (icon_id, mappings) in old_favicons {
                if self.is_any_bookmarked(&mappings.page_urls) {
                    continue;
                }
                favicon_db.delete_favicon(icon_id)?;
                favicon_db.delete_icon_mappings_for_favicon_id(icon_id)?;
                effects.deleted_favicons.insert(mappings.icon_url.clone());
                changed.push(mappings);
            }
            favicon_db.commit_transaction()?;
            favicon_db.flush()
        })();

        if let Err(e) = result {
            favicon_db.rollback_transaction();
            self.record_store_error("clear_old_on_demand_favicons", &e);
            return;
        }

        for mappings in &changed {
            let page_urls: BTreeSet<String> = mappings.page_urls.iter().cloned().collect();
            self.notifier
                .notify_favicons_changed(&page_urls, &mappings.icon_url);
        }
        info!(
            favicons = effects.deleted_favicons.len(),
            %expiration_threshold,
            "Cleared old on-demand favicons"
        );
        self.broadcast_notifications(
            effects,
            DeletionType::Expired,
            DeletionTimeRange::invalid(),
            None,
            DeletionReason::Other,
        );
    }

    fn is_bookmarked(&self, url: &str) -> bool {
        self.backend_client
            .as_ref()
            .is_some_and(|client| client.is_bookmarked(url))
    }

    fn is_any_bookmarked(&self, urls: &[String]) -> bool {
        self.backend_client
            .as_ref()
            .is_some_and(|client| client.is_any_bookmarked(urls))
    }

    /// Runs `op` inside one transaction per store, then commits and flushes
    /// both. Returns the collected effects only if everything was committed;
    /// on error every staged write is dropped.
    fn run<F>(&self, operation: &'static str, op: F) -> Option<DeleteEffects>
    where
        F: FnOnce(&dyn HistoryStore, &mut DeleteEffects) -> StorageResult<()>,
    {
        let db = self.main_db.as_deref()?;
        let favicon_db = self.favicon_db.as_deref();
        let mut effects = DeleteEffects::default();
        let result = begin_transactions(db, favicon_db)
            .and_then(|()| op(db, &mut effects))
            .and_then(|()| commit_transactions(db, favicon_db));
        match result {
            Ok(()) => Some(effects),
            Err(e) => {
                db.rollback_transaction();
                if let Some(favicon_db) = favicon_db {
                    favicon_db.rollback_transaction();
                }
                self.record_store_error(operation, &e);
                None
            }
        }
    }

    fn record_store_error(&self, operation: &str, error: &history_storage::StorageError) {
        warn!(operation, error = %error, "History expiration aborted");
        if let Some(metrics) = &self.metrics {
            metrics.store_errors.inc();
        }
    }

    fn delete_url_internal(
        &self,
        db: &dyn HistoryStore,
        url: &str,
        end_time: Time,
        effects: &mut DeleteEffects,
    ) -> StorageResult<()> {
        let is_bookmarked = self.is_bookmarked(url);
        let Some(mut row) = db.get_row_for_url(url)? else {
            // Icon mappings can outlive the URL row.
            if !is_bookmarked {
                self.delete_icon_mappings(url, effects)?;
            }
            return Ok(());
        };

        let delete_all = end_time.is_null() || end_time.is_max();
        let (expired, surviving): (Vec<VisitRow>, Vec<VisitRow>) = db
            .get_visits_for_url(row.id)?
            .into_iter()
            .partition(|visit| delete_all || visit.visit_time <= end_time);
        self.delete_visit_related_info(db, &expired, effects)?;

        if surviving.is_empty() && !is_bookmarked {
            return self.delete_one_url(db, &row, effects);
        }
        if expired.is_empty() {
            return Ok(());
        }

        let typed = expired
            .iter()
            .filter(|visit| visit.incremented_omnibox_typed_score)
            .count();
        row.visit_count = count_i32(surviving.len());
        row.typed_count = (row.typed_count - count_i32(typed)).max(0);
        row.last_visit = surviving
            .last()
            .map_or_else(Time::null, |visit| visit.visit_time);
        db.update_url_row(&row)?;
        effects.modified_urls.push(row);
        Ok(())
    }

    fn expire_visits_internal(
        &self,
        db: &dyn HistoryStore,
        visits: &[VisitRow],
        effects: &mut DeleteEffects,
    ) -> StorageResult<()> {
        let visits = self.collect_redirect_chains(db, visits)?;
        self.delete_visit_related_info(db, &visits, effects)?;
        self.expire_urls_for_visits(db, &visits, effects)?;
        self.delete_favicons_if_possible(effects)
    }

    /// Adds to `visits` the redirect hops that led to each of them. A visit
    /// that starts a redirect chain ends the walk. Each visit is reported at
    /// most once, so malformed referrer cycles terminate.
    fn collect_redirect_chains(
        &self,
        db: &dyn HistoryStore,
        visits: &[VisitRow],
    ) -> StorageResult<Vec<VisitRow>> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();

        for visit in visits {
            let mut current = db.get_row_for_visit(visit.id)?;
            while let Some(visit) = current.take() {
                if !seen.insert(visit.id) {
                    break;
                }
                let referrer = visit
                    .referring_visit
                    .filter(|_| !visit.transition.is_chain_start());
                result.push(visit);
                if let Some(referrer) = referrer {
                    current = db.get_row_for_visit(referrer)?;
                }
            }
        }
        Ok(result)
    }

    fn delete_visit_related_info(
        &self,
        db: &dyn HistoryStore,
        visits: &[VisitRow],
        effects: &mut DeleteEffects,
    ) -> StorageResult<()> {
        for visit in visits {
            for updated in db.delete_visit(visit)? {
                effects.updated_visits.insert(updated.id, updated);
            }
            db.delete_annotations_for_visit(visit.id)?;

            if !effects.affected_urls.contains_key(&visit.url_id) {
                if let Some(row) = db.get_url_row(visit.url_id)? {
                    effects.affected_urls.insert(visit.url_id, row);
                }
            }
            effects.deleted_visits.push(visit.clone());
        }
        Ok(())
    }

    /// Updates or deletes the URL rows whose visits were just deleted.
    fn expire_urls_for_visits(
        &self,
        db: &dyn HistoryStore,
        visits: &[VisitRow],
        effects: &mut DeleteEffects,
    ) -> StorageResult<()> {
        // url id -> (visits removed, typed visits removed)
        let mut changes: BTreeMap<UrlId, (usize, usize)> = BTreeMap::new();
        for visit in visits {
            let change = changes.entry(visit.url_id).or_default();
            change.0 += 1;
            if visit.incremented_omnibox_typed_score {
                change.1 += 1;
            }
        }

        for (url_id, (visit_count, typed_count)) in changes {
            let Some(mut row) = effects.affected_urls.get(&url_id).cloned() else {
                continue;
            };
            let most_recent = db.get_most_recent_visit_for_url(url_id)?;
            if most_recent.is_none() && !self.is_bookmarked(&row.url) {
                self.delete_one_url(db, &row, effects)?;
                continue;
            }

            row.visit_count = (row.visit_count - count_i32(visit_count)).max(0);
            row.typed_count = (row.typed_count - count_i32(typed_count)).max(0);
            row.last_visit = most_recent.map_or_else(Time::null, |visit| visit.visit_time);
            db.update_url_row(&row)?;
            effects.modified_urls.push(row);
        }
        Ok(())
    }

    fn delete_one_url(
        &self,
        db: &dyn HistoryStore,
        row: &UrlRow,
        effects: &mut DeleteEffects,
    ) -> StorageResult<()> {
        effects.deleted_urls.push(row.clone());
        self.delete_icon_mappings(&row.url, effects)?;
        db.delete_url_row(row.id)
    }

    fn delete_icon_mappings(&self, page_url: &str, effects: &mut DeleteEffects) -> StorageResult<()> {
        let Some(favicon_db) = self.favicon_db.as_deref() else {
            return Ok(());
        };
        for mapping in favicon_db.get_icon_mappings_for_page_url(page_url)? {
            effects.affected_favicons.insert(mapping.icon_id);
        }
        favicon_db.delete_icon_mappings_for_page_url(page_url)
    }

    fn broadcast_notifications(
        &self,
        effects: DeleteEffects,
        deletion_type: DeletionType,
        time_range: DeletionTimeRange,
        restrict_urls: Option<BTreeSet<String>>,
        reason: DeletionReason,
    ) {
        let deleted_ids: HashSet<VisitId> =
            effects.deleted_visits.iter().map(|visit| visit.id).collect();
        for visit in &effects.deleted_visits {
            self.notifier.notify_visit_deleted(visit);
        }
        for visit in effects.updated_visits.values() {
            if !deleted_ids.contains(&visit.id) {
                self.notifier
                    .notify_visit_updated(visit, VisitUpdateReason::UpdateReferringVisit);
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.visits_expired.inc_by(effects.deleted_visits.len() as u64);
            metrics.urls_deleted.inc_by(effects.deleted_urls.len() as u64);
            metrics.urls_modified.inc_by(effects.modified_urls.len() as u64);
            metrics
                .favicons_deleted
                .inc_by(effects.deleted_favicons.len() as u64);
        }

        let is_from_expiration = deletion_type == DeletionType::Expired;
        if !effects.modified_urls.is_empty() {
            self.notifier
                .notify_urls_modified(&effects.modified_urls, is_from_expiration);
        }
        if !effects.deleted_urls.is_empty() || time_range.is_valid() {
            let info = DeletionInfo::new(
                time_range,
                is_from_expiration,
                effects.deleted_urls,
                effects.deleted_favicons,
                restrict_urls,
            )
            .with_reason(reason);
            self.notifier.notify_urls_deleted(info);
        }
    }
}

fn begin_transactions(
    db: &dyn HistoryStore,
    favicon_db: Option<&dyn FaviconStore>,
) -> StorageResult<()> {
    db.begin_transaction()?;
    if let Some(favicon_db) = favicon_db {
        favicon_db.begin_transaction()?;
    }
    Ok(())
}

fn commit_transactions(
    db: &dyn HistoryStore,
    favicon_db: Option<&dyn FaviconStore>,
) -> StorageResult<()> {
    db.commit_transaction()?;
    db.flush()?;
    if let Some(favicon_db) = favicon_db {
        favicon_db.commit_transaction()?;
        favicon_db.flush()?;
    }
    Ok(())
}

fn count_i32(count: usize) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}
