use history_types::{
    FaviconBitmap, FaviconBitmapType, FaviconHeader, FaviconId, IconMapping, IconMappingId,
    IconMappingsForExpiry, IconType, PixelSize, Time,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::keys;
use crate::transaction::StagedDatabase;
use crate::store::FaviconStore;
use crate::{
    decode, Database, KeyPrefix, Result, StorageError, TypedDatabase, TypedWriteBatch, WriteBatch,
};

const NEXT_FAVICON_ID: &str = "next_favicon_id";
const NEXT_BITMAP_ID: &str = "next_favicon_bitmap_id";
const NEXT_MAPPING_ID: &str = "next_icon_mapping_id";

/// Favicon rows kept in a key-value `Database`, separate from history rows.
pub struct FaviconDatabase<D: Database> {
    db: StagedDatabase<D>,
    write_lock: Mutex<()>,
}

impl<D: Database> FaviconDatabase<D> {
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
            .map_err(|_| StorageError::DatabaseError("favicon write lock poisoned".to_string()))
    }

    fn allocate_id(&self, counter: &str, batch: &mut Box<dyn WriteBatch>) -> Result<i64> {
        let key = keys::meta_key(counter);
        let id: i64 = self.db.get_typed(&key)?.unwrap_or(1);
        batch.put_typed(&key, &(id + 1))?;
        Ok(id)
    }

    fn mappings_under(&self, prefix: &[u8]) -> Result<Vec<IconMapping>> {
        let mut mappings = Vec::new();
        for (key, _) in self.db.scan_prefix(prefix)? {
            let id = keys::id_suffix(&key)?;
            if let Some(mapping) = self.db.get_typed(&keys::icon_mapping_key(id))? {
                mappings.push(mapping);
            }
        }
        Ok(mappings)
    }

    fn remove_mapping(batch: &mut Box<dyn WriteBatch>, mapping: &IconMapping) {
        batch.delete(&keys::icon_mapping_key(mapping.id));
        batch.delete(&keys::mapping_by_page_key(&mapping.page_url, mapping.id));
        batch.delete(&keys::mapping_by_icon_key(mapping.icon_id, mapping.id));
    }

    fn delete_mappings(&self, mappings: &[IconMapping]) -> Result<()> {
        if mappings.is_empty() {
            return Ok(());
        }
        let mut batch = self.db.batch();
        for mapping in mappings {
            Self::remove_mapping(&mut batch, mapping);
        }
        self.db.write_batch(batch)
    }

    /// Number of favicons, for diagnostics.
    pub fn favicon_count(&self) -> Result<usize> {
        Ok(self.db.scan_prefix(&[KeyPrefix::Favicon.as_byte()])?.len())
    }
}

impl<D: Database> FaviconStore for FaviconDatabase<D> {
    fn add_favicon(&self, icon_url: &str, icon_type: IconType) -> Result<FaviconId> {
        let _guard = self.lock()?;
        let mut batch = self.db.batch();
        let id = self.allocate_id(NEXT_FAVICON_ID, &mut batch)?;
        let header = FaviconHeader {
            id,
            icon_url: icon_url.to_string(),
            icon_type,
        };
        batch.put_typed(&keys::favicon_key(id), &header)?;
        self.db.write_batch(batch)?;
        Ok(id)
    }

    fn add_favicon_bitmap(
        &self,
        icon_id: FaviconId,
        data: Vec<u8>,
        bitmap_type: FaviconBitmapType,
        time: Time,
        pixel_size: PixelSize,
    ) -> Result<i64> {
        let _guard = self.lock()?;
        let mut batch = self.db.batch();
        let id = self.allocate_id(NEXT_BITMAP_ID, &mut batch)?;
        let (last_updated, last_requested) = match bitmap_type {
            FaviconBitmapType::OnVisit => (time, Time::null()),
            FaviconBitmapType::OnDemand => (Time::null(), time),
        };
        let bitmap = FaviconBitmap {
            id,
            icon_id,
            bitmap_type,
            last_updated,
            last_requested,
            data,
            pixel_size,
        };
        batch.put_typed(&keys::bitmap_key(icon_id, id), &bitmap)?;
        self.db.write_batch(batch)?;
        Ok(id)
    }

    fn get_favicon_header(&self, icon_id: FaviconId) -> Result<Option<FaviconHeader>> {
        self.db.get_typed(&keys::favicon_key(icon_id))
    }

    fn get_favicon_bitmaps(&self, icon_id: FaviconId) -> Result<Vec<FaviconBitmap>> {
        self.db
            .scan_prefix(&keys::bitmap_prefix(icon_id))?
            .iter()
            .map(|(_, value)| decode(value))
            .collect()
    }

    fn delete_favicon(&self, icon_id: FaviconId) -> Result<bool> {
        let _guard = self.lock()?;
        let key = keys::favicon_key(icon_id);
        if !self.db.contains(&key)? {
            return Ok(false);
        }

        let mut batch = self.db.batch();
        batch.delete(&key);
        for (bitmap_key, _) in self.db.scan_prefix(&keys::bitmap_prefix(icon_id))? {
            batch.delete(&bitmap_key);
        }
        self.db.write_batch(batch)?;

        debug!(icon_id, "Deleted favicon");
        Ok(true)
    }

    fn add_icon_mapping(&self, page_url: &str, icon_id: FaviconId) -> Result<IconMappingId> {
        let _guard = self.lock()?;
        let header = self
            .get_favicon_header(icon_id)?
            .ok_or_else(|| StorageError::InvalidData(format!("no favicon with id {}", icon_id)))?;

        let mut batch = self.db.batch();
        let id = self.allocate_id(NEXT_MAPPING_ID, &mut batch)?;
        let mapping = IconMapping {
            id,
            page_url: page_url.to_string(),
            icon_id,
            icon_url: header.icon_url,
            icon_type: header.icon_type,
        };
        batch.put_typed(&keys::icon_mapping_key(id), &mapping)?;
        batch.put(&keys::mapping_by_page_key(page_url, id), &[]);
        batch.put(&keys::mapping_by_icon_key(icon_id, id), &[]);
        self.db.write_batch(batch)?;
        Ok(id)
    }

    fn get_icon_mappings_for_page_url(&self, page_url: &str) -> Result<Vec<IconMapping>> {
        self.mappings_under(&keys::mapping_by_page_prefix(page_url))
    }

    fn delete_icon_mapping(&self, mapping_id: IconMappingId) -> Result<bool> {
        let _guard = self.lock()?;
        let Some(mapping) = self
            .db
            .get_typed::<IconMapping>(&keys::icon_mapping_key(mapping_id))?
        else {
            return Ok(false);
        };
        self.delete_mappings(&[mapping])?;
        Ok(true)
    }

    fn delete_icon_mappings_for_page_url(&self, page_url: &str) -> Result<()> {
        let _guard = self.lock()?;
        let mappings = self.mappings_under(&keys::mapping_by_page_prefix(page_url))?;
        self.delete_mappings(&mappings)
    }

    fn delete_icon_mappings_for_favicon_id(&self, icon_id: FaviconId) -> Result<()> {
        let _guard = self.lock()?;
        let mappings = self.mappings_under(&keys::mapping_by_icon_prefix(icon_id))?;
        self.delete_mappings(&mappings)
    }

    fn has_mapping_for(&self, icon_id: FaviconId) -> Result<bool> {
        let mut iter = self.db.iter_prefix(&keys::mapping_by_icon_prefix(icon_id));
        match iter.next() {
            Some(entry) => entry.map(|_| true),
            None => Ok(false),
        }
    }

    fn get_old_on_demand_favicons(
        &self,
        threshold: Time,
    ) -> Result<BTreeMap<FaviconId, IconMappingsForExpiry>> {
        let mut old = BTreeMap::new();
        for (_, value) in self.db.scan_prefix(&[KeyPrefix::FaviconBitmap.as_byte()])? {
            let bitmap: FaviconBitmap = decode(&value)?;
            let is_old_on_demand = bitmap.bitmap_type == FaviconBitmapType::OnDemand
                && !bitmap.last_requested.is_null()
                && bitmap.last_requested < threshold;
            if !is_old_on_demand || old.contains_key(&bitmap.icon_id) {
                continue;
            }

            let mappings = self.mappings_under(&keys::mapping_by_icon_prefix(bitmap.icon_id))?;
            let Some(first) = mappings.first() else {
                continue;
            };
            let entry = IconMappingsForExpiry {
                icon_url: first.icon_url.clone(),
                page_urls: mappings.iter().map(|m| m.page_url.clone()).collect(),
            };
            old.insert(bitmap.icon_id, entry);
        }
        Ok(old)
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
