use history_types::{
    PageTransition, Time, UrlId, UrlRow, VisitContextAnnotations, VisitId, VisitRow,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::keys;
use crate::transaction::StagedDatabase;
use crate::{
    decode, Database, KeyPrefix, Result, StorageError, TypedDatabase, TypedWriteBatch, WriteBatch,
};
use crate::store::HistoryStore;

const NEXT_URL_ID: &str = "next_url_id";
const NEXT_VISIT_ID: &str = "next_visit_id";
const EARLY_EXPIRATION_THRESHOLD: &str = "early_expiration_threshold";

/// Watermark of a store that has never completed an auto-subframe sweep.
const INITIAL_EARLY_EXPIRATION_THRESHOLD: Time = Time::from_internal_value(1);

/// URL and visit rows kept in a key-value `Database`.
pub struct HistoryDatabase<D: Database> {
    db: StagedDatabase<D>,
    // Serializes id allocation with the insert that consumes the id.
    write_lock: Mutex<()>,
}

impl<D: Database> HistoryDatabase<D> {
    pub fn new(db: Arc<D>) -> Self {
        Self {
            db: StagedDatabase::new(db),
            write_lock: Mutex::new(()),
        }
    }

    pub fn database(&self) -> &Arc<D> {
        self.db.inner()
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StorageError::DatabaseError("history write lock poisoned".to_string()))
    }

    fn allocate_id(&self, counter: &str, batch: &mut Box<dyn WriteBatch>) -> Result<i64> {
        let key = keys::meta_key(counter);
        let id: i64 = self.db.get_typed(&key)?.unwrap_or(1);
        batch.put_typed(&key, &(id + 1))?;
        Ok(id)
    }

    fn index_ids(&self, prefix: &[u8]) -> Result<Vec<i64>> {
        self.db
            .scan_prefix(prefix)?
            .iter()
            .map(|(key, _)| keys::id_suffix(key))
            .collect()
    }

    fn load_visits(&self, ids: impl IntoIterator<Item = VisitId>) -> Result<Vec<VisitRow>> {
        let mut visits = Vec::new();
        for id in ids {
            match self.get_row_for_visit(id)? {
                Some(visit) => visits.push(visit),
                None => debug!(visit_id = id, "Dangling visit index entry"),
            }
        }
        Ok(visits)
    }

    fn put_visit(&self, batch: &mut Box<dyn WriteBatch>, visit: &VisitRow) -> Result<()> {
        batch.put_typed(&keys::visit_key(visit.id), visit)?;
        batch.put(&keys::visit_by_time_key(visit.visit_time, visit.id), &[]);
        batch.put(&keys::visit_by_url_key(visit.url_id, visit.id), &[]);
        if let Some(referrer) = visit.referring_visit {
            batch.put(&keys::visit_by_referrer_key(referrer, visit.id), &[]);
        }
        Ok(())
    }

    fn remove_visit(batch: &mut Box<dyn WriteBatch>, visit: &VisitRow) {
        batch.delete(&keys::visit_key(visit.id));
        batch.delete(&keys::visit_by_time_key(visit.visit_time, visit.id));
        batch.delete(&keys::visit_by_url_key(visit.url_id, visit.id));
        if let Some(referrer) = visit.referring_visit {
            batch.delete(&keys::visit_by_referrer_key(referrer, visit.id));
        }
    }

    /// Walks the time index from `begin`, keeping visits that pass `filter`.
    fn scan_visits_by_time(
        &self,
        begin: Time,
        end: Time,
        max_results: usize,
        filter: impl Fn(&VisitRow) -> bool,
    ) -> Result<Vec<VisitRow>> {
        let prefix = [KeyPrefix::VisitByTime.as_byte()];
        let mut iter = self.db.iter_from(&keys::visit_by_time_prefix(begin));
        let mut visits = Vec::new();

        while let Some(entry) = iter.next() {
            let (key, _) = entry?;
            if !key.starts_with(&prefix) {
                break;
            }
            let time = keys::time_from_bytes(&key[1..9])?;
            if !end.is_null() && time >= end {
                break;
            }
            let id = keys::id_suffix(&key)?;
            let Some(visit) = self.get_row_for_visit(id)? else {
                continue;
            };
            if filter(&visit) {
                visits.push(visit);
                if max_results != 0 && visits.len() >= max_results {
                    break;
                }
            }
        }

        Ok(visits)
    }

    /// Number of URL rows, for diagnostics.
    pub fn url_count(&self) -> Result<usize> {
        Ok(self.db.scan_prefix(&[KeyPrefix::Url.as_byte()])?.len())
    }

    /// Number of visit rows, for diagnostics.
    pub fn visit_count(&self) -> Result<usize> {
        Ok(self.db.scan_prefix(&[KeyPrefix::Visit.as_byte()])?.len())
    }

    /// Every URL row, ordered by id.
    pub fn all_urls(&self) -> Result<Vec<UrlRow>> {
        self.db
            .scan_prefix(&[KeyPrefix::Url.as_byte()])?
            .iter()
            .map(|(_, value)| decode(value))
            .collect()
    }
}

impl<D: Database> HistoryStore for HistoryDatabase<D> {
    fn get_url_row(&self, id: UrlId) -> Result<Option<UrlRow>> {
        self.db.get_typed(&keys::url_key(id))
    }

    fn get_row_for_url(&self, url: &str) -> Result<Option<UrlRow>> {
        match self.db.get_typed::<UrlId>(&keys::url_by_spec_key(url))? {
            Some(id) => self.get_url_row(id),
            None => Ok(None),
        }
    }

    fn add_url(&self, row: &UrlRow) -> Result<UrlId> {
        let _guard = self.lock()?;
        if self.db.contains(&keys::url_by_spec_key(&row.url))? {
            return Err(StorageError::InvalidData(format!(
                "URL already stored: {}",
                row.url
            )));
        }

        let mut batch = self.db.batch();
        let id = self.allocate_id(NEXT_URL_ID, &mut batch)?;
        let stored = UrlRow { id, ..row.clone() };
        batch.put_typed(&keys::url_key(id), &stored)?;
        batch.put_typed(&keys::url_by_spec_key(&stored.url), &id)?;
        self.db.write_batch(batch)?;

        debug!(url_id = id, url = %stored.url, "Added URL row");
        Ok(id)
    }

    fn update_url_row(&self, row: &UrlRow) -> Result<()> {
        let _guard = self.lock()?;
        let old = self
            .get_url_row(row.id)?
            .ok_or(StorageError::KeyNotFound)?;

        let mut batch = self.db.batch();
        if old.url != row.url {
            batch.delete(&keys::url_by_spec_key(&old.url));
            batch.put_typed(&keys::url_by_spec_key(&row.url), &row.id)?;
        }
        batch.put_typed(&keys::url_key(row.id), row)?;
        self.db.write_batch(batch)
    }

    fn delete_url_row(&self, id: UrlId) -> Result<()> {
        let _guard = self.lock()?;
        let Some(row) = self.get_url_row(id)? else {
            return Ok(());
        };

        let mut batch = self.db.batch();
        batch.delete(&keys::url_key(id));
        batch.delete(&keys::url_by_spec_key(&row.url));
        self.db.write_batch(batch)
    }

    fn add_visit(&self, visit: &mut VisitRow) -> Result<VisitId> {
        let _guard = self.lock()?;
        let mut batch = self.db.batch();
        visit.id = self.allocate_id(NEXT_VISIT_ID, &mut batch)?;
        self.put_visit(&mut batch, visit)?;
        self.db.write_batch(batch)?;
        Ok(visit.id)
    }

    fn get_row_for_visit(&self, id: VisitId) -> Result<Option<VisitRow>> {
        self.db.get_typed(&keys::visit_key(id))
    }

    fn update_visit_row(&self, visit: &VisitRow) -> Result<()> {
        let _guard = self.lock()?;
        let old = self
            .get_row_for_visit(visit.id)?
            .ok_or(StorageError::KeyNotFound)?;

        let mut batch = self.db.batch();
        Self::remove_visit(&mut batch, &old);
        self.put_visit(&mut batch, visit)?;
        self.db.write_batch(batch)
    }

    fn delete_visit(&self, visit: &VisitRow) -> Result<Vec<VisitRow>> {
        let _guard = self.lock()?;
        let Some(stored) = self.get_row_for_visit(visit.id)? else {
            return Ok(Vec::new());
        };

        let mut batch = self.db.batch();
        let mut reparented = Vec::new();
        let children = self.index_ids(&keys::visit_by_referrer_prefix(stored.id))?;
        for child in self.load_visits(children)? {
            if child.id == stored.id {
                continue;
            }
            let mut updated = child.clone();
            updated.referring_visit = stored.referring_visit.filter(|r| *r != child.id);
            Self::remove_visit(&mut batch, &child);
            self.put_visit(&mut batch, &updated)?;
            reparented.push(updated);
        }
        Self::remove_visit(&mut batch, &stored);
        self.db.write_batch(batch)?;

        Ok(reparented)
    }

    fn get_visits_for_url(&self, url_id: UrlId) -> Result<Vec<VisitRow>> {
        let ids = self.index_ids(&keys::visit_by_url_prefix(url_id))?;
        let mut visits = self.load_visits(ids)?;
        visits.sort_by_key(|v| (v.visit_time, v.id));
        Ok(visits)
    }

    fn get_most_recent_visit_for_url(&self, url_id: UrlId) -> Result<Option<VisitRow>> {
        Ok(self.get_visits_for_url(url_id)?.pop())
    }

    fn get_all_visits_in_range(
        &self,
        begin: Time,
        end: Time,
        max_results: usize,
    ) -> Result<Vec<VisitRow>> {
        self.scan_visits_by_time(begin, end, max_results, |_| true)
    }

    fn get_visits_in_range_for_transition(
        &self,
        begin: Time,
        end: Time,
        max_results: usize,
        transition: PageTransition,
    ) -> Result<Vec<VisitRow>> {
        self.scan_visits_by_time(begin, end, max_results, |visit| {
            visit.transition.core_type_is(transition)
        })
    }

    fn get_visits_for_times(&self, times: &[Time]) -> Result<Vec<VisitRow>> {
        let unique: BTreeSet<Time> = times.iter().copied().collect();
        let mut visits = Vec::new();
        for time in unique {
            let ids = self.index_ids(&keys::visit_by_time_prefix(time))?;
            visits.extend(self.load_visits(ids)?);
        }
        Ok(visits)
    }

    fn add_context_annotations_for_visit(
        &self,
        visit_id: VisitId,
        annotations: &VisitContextAnnotations,
    ) -> Result<()> {
        self.db
            .put_typed(&keys::annotations_key(visit_id), annotations)
    }

    fn get_context_annotations_for_visit(
        &self,
        visit_id: VisitId,
    ) -> Result<Option<VisitContextAnnotations>> {
        self.db.get_typed(&keys::annotations_key(visit_id))
    }

    fn delete_annotations_for_visit(&self, visit_id: VisitId) -> Result<()> {
        self.db.delete(&keys::annotations_key(visit_id))
    }

    fn get_early_expiration_threshold(&self) -> Result<Time> {
        Ok(self
            .db
            .get_typed(&keys::meta_key(EARLY_EXPIRATION_THRESHOLD))?
            .unwrap_or(INITIAL_EARLY_EXPIRATION_THRESHOLD))
    }

    fn update_early_expiration_threshold(&self, threshold: Time) -> Result<()> {
        self.db
            .put_typed(&keys::meta_key(EARLY_EXPIRATION_THRESHOLD), &threshold)
    }

    fn begin_transaction(&self) -> Result<()> {
        self.db.begin()
    }

    fn commit_transaction(&self) -> Result<()> {
        self.db.commit()
    }

    fn rollback_transaction(&self) {
        self.db.rollback()
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()
    }
}
