//! Row-level interfaces consumed by the expiration engine.

use history_types::{
    FaviconBitmap, FaviconBitmapType, FaviconHeader, FaviconId, IconMapping, IconMappingId,
    IconMappingsForExpiry, IconType, PageTransition, PixelSize, Time, UrlId, UrlRow,
    VisitContextAnnotations, VisitId, VisitRow,
};
use std::collections::BTreeMap;

use crate::Result;

/// URL, visit and annotation rows of the main history database.
///
/// Range queries treat `end` as exclusive and a null `end` as unbounded.
/// A `max_results` of zero means no limit.
pub trait HistoryStore: Send + Sync {
    fn get_url_row(&self, id: UrlId) -> Result<Option<UrlRow>>;

    fn get_row_for_url(&self, url: &str) -> Result<Option<UrlRow>>;

    /// Inserts a new row and returns its id. Fails if the URL already exists.
    fn add_url(&self, row: &UrlRow) -> Result<UrlId>;

    fn update_url_row(&self, row: &UrlRow) -> Result<()>;

    fn delete_url_row(&self, id: UrlId) -> Result<()>;

    /// Inserts the visit, assigning and returning its id.
    fn add_visit(&self, visit: &mut VisitRow) -> Result<VisitId>;

    fn get_row_for_visit(&self, id: VisitId) -> Result<Option<VisitRow>>;

    fn update_visit_row(&self, visit: &VisitRow) -> Result<()>;

    /// Removes the visit. Visits that were referred by it are re-pointed at
    /// its own referrer; the re-pointed rows are returned.
    fn delete_visit(&self, visit: &VisitRow) -> Result<Vec<VisitRow>>;

    /// Visits of a URL, oldest first.
    fn get_visits_for_url(&self, url_id: UrlId) -> Result<Vec<VisitRow>>;

    fn get_most_recent_visit_for_url(&self, url_id: UrlId) -> Result<Option<VisitRow>>;

    /// Visits with `begin <= visit_time < end`, oldest first.
    fn get_all_visits_in_range(
        &self,
        begin: Time,
        end: Time,
        max_results: usize,
    ) -> Result<Vec<VisitRow>>;

    /// Like `get_all_visits_in_range`, keeping only visits whose core
    /// transition type matches `transition`.
    fn get_visits_in_range_for_transition(
        &self,
        begin: Time,
        end: Time,
        max_results: usize,
        transition: PageTransition,
    ) -> Result<Vec<VisitRow>>;

    /// Visits whose time exactly equals one of `times`.
    fn get_visits_for_times(&self, times: &[Time]) -> Result<Vec<VisitRow>>;

    fn add_context_annotations_for_visit(
        &self,
        visit_id: VisitId,
        annotations: &VisitContextAnnotations,
    ) -> Result<()>;

    fn get_context_annotations_for_visit(
        &self,
        visit_id: VisitId,
    ) -> Result<Option<VisitContextAnnotations>>;

    fn delete_annotations_for_visit(&self, visit_id: VisitId) -> Result<()>;

    /// Watermark below which auto-subframe visits are known to be expired.
    fn get_early_expiration_threshold(&self) -> Result<Time>;

    fn update_early_expiration_threshold(&self, threshold: Time) -> Result<()>;

    /// Stages every later write until `commit_transaction` applies them as
    /// one atomic write or `rollback_transaction` drops them.
    fn begin_transaction(&self) -> Result<()>;

    fn commit_transaction(&self) -> Result<()>;

    fn rollback_transaction(&self);

    fn flush(&self) -> Result<()>;
}

/// Favicons, their bitmaps, and page-to-icon mappings.
pub trait FaviconStore: Send + Sync {
    fn add_favicon(&self, icon_url: &str, icon_type: IconType) -> Result<FaviconId>;

    /// Adds a bitmap. On-demand bitmaps record `time` as their last request
    /// time; on-visit bitmaps record it as their last update time.
    fn add_favicon_bitmap(
        &self,
        icon_id: FaviconId,
        data: Vec<u8>,
        bitmap_type: FaviconBitmapType,
        time: Time,
        pixel_size: PixelSize,
    ) -> Result<i64>;

    fn add_favicon_with_bitmap(
        &self,
        icon_url: &str,
        icon_type: IconType,
        data: Vec<u8>,
        bitmap_type: FaviconBitmapType,
        time: Time,
        pixel_size: PixelSize,
    ) -> Result<FaviconId> {
        let icon_id = self.add_favicon(icon_url, icon_type)?;
        self.add_favicon_bitmap(icon_id, data, bitmap_type, time, pixel_size)?;
        Ok(icon_id)
    }

    fn get_favicon_header(&self, icon_id: FaviconId) -> Result<Option<FaviconHeader>>;

    fn get_favicon_bitmaps(&self, icon_id: FaviconId) -> Result<Vec<FaviconBitmap>>;

    /// Removes the favicon and its bitmaps, leaving mappings alone.
    /// Returns false if there was no such favicon.
    fn delete_favicon(&self, icon_id: FaviconId) -> Result<bool>;

    fn add_icon_mapping(&self, page_url: &str, icon_id: FaviconId) -> Result<IconMappingId>;

    fn get_icon_mappings_for_page_url(&self, page_url: &str) -> Result<Vec<IconMapping>>;

    fn delete_icon_mapping(&self, mapping_id: IconMappingId) -> Result<bool>;

    fn delete_icon_mappings_for_page_url(&self, page_url: &str) -> Result<()>;

    fn delete_icon_mappings_for_favicon_id(&self, icon_id: FaviconId) -> Result<()>;

    fn has_mapping_for(&self, icon_id: FaviconId) -> Result<bool>;

    /// On-demand favicons whose bitmaps were last requested before
    /// `threshold`, with the pages mapped to each. Unmapped icons are omitted.
    fn get_old_on_demand_favicons(
        &self,
        threshold: Time,
    ) -> Result<BTreeMap<FaviconId, IconMappingsForExpiry>>;

    /// Same contract as `HistoryStore::begin_transaction`.
    fn begin_transaction(&self) -> Result<()>;

    fn commit_transaction(&self) -> Result<()>;

    fn rollback_transaction(&self);

    fn flush(&self) -> Result<()>;
}
