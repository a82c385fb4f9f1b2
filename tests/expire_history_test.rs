use history_rust::expiry::{
    AllVisitsReader, AutoSubframeVisitsReader, DeleteEffects, DeletionInfo, DeletionReason,
    ExpireHistoryBackend, ExpiryConfig, ExpiryMetrics, HistoryBackendNotifier, InMemoryBookmarks,
    VisitUpdateReason,
};
use history_rust::storage::{
    FaviconDatabase, FaviconStore, HistoryDatabase, HistoryStore, MemoryDatabase,
    Result as StorageResult, StorageError,
};
use history_rust::types::time::{days, minutes};
use history_rust::types::{
    FaviconBitmapType, FaviconId, IconType, PageTransition, PixelSize, Time, UrlId, UrlRow,
    VisitContextAnnotations, VisitId, VisitRow,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const URL1: &str = "http://www.google.com/1";
const URL2: &str = "http://www.google.com/2";
const URL3: &str = "http://www.google.com/3";
const FAVICON1: &str = "http://favicon/url1";
const FAVICON2: &str = "http://favicon/url2";

#[derive(Default)]
struct RecordingNotifier {
    deleted: Mutex<Vec<DeletionInfo>>,
    modified: Mutex<Vec<(Vec<UrlRow>, bool)>>,
    visits_deleted: Mutex<Vec<VisitRow>>,
    visits_updated: Mutex<Vec<VisitRow>>,
    favicons_changed: Mutex<Vec<(BTreeSet<String>, String)>>,
}

impl RecordingNotifier {
    fn deleted(&self) -> Vec<DeletionInfo> {
        self.deleted.lock().unwrap().clone()
    }

    fn modified(&self) -> Vec<(Vec<UrlRow>, bool)> {
        self.modified.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.deleted.lock().unwrap().clear();
        self.modified.lock().unwrap().clear();
        self.visits_deleted.lock().unwrap().clear();
        self.visits_updated.lock().unwrap().clear();
        self.favicons_changed.lock().unwrap().clear();
    }
}

impl HistoryBackendNotifier for RecordingNotifier {
    fn notify_favicons_changed(&self, page_urls: &BTreeSet<String>, icon_url: &str) {
        self.favicons_changed
            .lock()
            .unwrap()
            .push((page_urls.clone(), icon_url.to_string()));
    }

    fn notify_urls_modified(&self, changed_urls: &[UrlRow], is_from_expiration: bool) {
        self.modified
            .lock()
            .unwrap()
            .push((changed_urls.to_vec(), is_from_expiration));
    }

    fn notify_urls_deleted(&self, deletion_info: DeletionInfo) {
        self.deleted.lock().unwrap().push(deletion_info);
    }

    fn notify_visit_updated(&self, visit: &VisitRow, reason: VisitUpdateReason) {
        assert_eq!(reason, VisitUpdateReason::UpdateReferringVisit);
        self.visits_updated.lock().unwrap().push(visit.clone());
    }

    fn notify_visit_deleted(&self, visit: &VisitRow) {
        self.visits_deleted.lock().unwrap().push(visit.clone());
    }
}

struct ExpireHistoryTest {
    notifier: Arc<RecordingNotifier>,
    bookmarks: Arc<InMemoryBookmarks>,
    main_db: Arc<HistoryDatabase<MemoryDatabase>>,
    favicon_db: Arc<FaviconDatabase<MemoryDatabase>>,
    expirer: ExpireHistoryBackend,
    now: Time,
}

/// Ids and times of the rows added by `add_example_data`.
struct ExampleData {
    url_ids: [UrlId; 3],
    visit_times: [Time; 4],
    favicon1: FaviconId,
    favicon2: FaviconId,
}

impl ExpireHistoryTest {
    fn new() -> Self {
        Self::with_config(ExpiryConfig::default())
    }

    fn with_config(config: ExpiryConfig) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let bookmarks = Arc::new(InMemoryBookmarks::new());
        let main_db = Arc::new(HistoryDatabase::new(Arc::new(MemoryDatabase::new())));
        let favicon_db = Arc::new(FaviconDatabase::new(Arc::new(MemoryDatabase::new())));
        let mut expirer =
            ExpireHistoryBackend::new(notifier.clone(), Some(bookmarks.clone()), config);
        expirer.set_databases(Some(main_db.clone()), Some(favicon_db.clone()));
        Self {
            notifier,
            bookmarks,
            main_db,
            favicon_db,
            expirer,
            now: Time::from_unix_seconds(1_700_000_000),
        }
    }

    fn db(&self) -> &dyn HistoryStore {
        self.main_db.as_ref()
    }

    /// Three URLs with four visits: URL1 at t0, URL2 at t1 and t2 (the
    /// latter typed), URL3 at t3. URL1 and URL2 share FAVICON1.
    fn add_example_data(&self) -> ExampleData {
        let visit_times = [
            self.now - days(3),
            self.now - days(2),
            self.now - days(1),
            self.now,
        ];

        let favicon1 = self.add_favicon(FAVICON1, FaviconBitmapType::OnVisit, visit_times[0]);
        let favicon2 = self.add_favicon(FAVICON2, FaviconBitmapType::OnVisit, visit_times[0]);

        let url_ids = [
            self.add_url_row(URL1, 1, 1, visit_times[0]),
            self.add_url_row(URL2, 2, 1, visit_times[2]),
            self.add_url_row(URL3, 1, 0, visit_times[3]),
        ];
        self.favicon_db.add_icon_mapping(URL1, favicon1).unwrap();
        self.favicon_db.add_icon_mapping(URL2, favicon1).unwrap();
        self.favicon_db.add_icon_mapping(URL3, favicon2).unwrap();

        let typed = PageTransition::TYPED;
        self.add_visit(url_ids[0], visit_times[0], None, typed, false);
        self.add_visit(url_ids[1], visit_times[1], None, typed, false);
        self.add_visit(url_ids[1], visit_times[2], None, typed, true);
        self.add_visit(url_ids[2], visit_times[3], None, typed, false);

        ExampleData {
            url_ids,
            visit_times,
            favicon1,
            favicon2,
        }
    }

    fn add_url_row(&self, url: &str, visits: i32, typed: i32, last_visit: Time) -> UrlId {
        let mut row = UrlRow::new(url);
        row.visit_count = visits;
        row.typed_count = typed;
        row.last_visit = last_visit;
        self.db().add_url(&row).unwrap()
    }

    fn add_visit(
        &self,
        url_id: UrlId,
        time: Time,
        referrer: Option<VisitId>,
        transition: PageTransition,
        incremented_typed: bool,
    ) -> VisitRow {
        let mut visit = VisitRow::new(url_id, time, referrer, transition, incremented_typed);
        self.db().add_visit(&mut visit).unwrap();
        visit
    }

    /// Adds a URL row with a single visit.
    fn add_visited_url(
        &self,
        url: &str,
        time: Time,
        referrer: Option<VisitId>,
        transition: PageTransition,
    ) -> (UrlId, VisitRow) {
        let url_id = self.add_url_row(url, 1, 0, time);
        let visit = self.add_visit(url_id, time, referrer, transition, false);
        (url_id, visit)
    }

    fn add_favicon(&self, icon_url: &str, bitmap_type: FaviconBitmapType, time: Time) -> FaviconId {
        self.favicon_db
            .add_favicon_with_bitmap(
                icon_url,
                IconType::Favicon,
                vec![0xff, 0xd8],
                bitmap_type,
                time,
                PixelSize::new(16, 16),
            )
            .unwrap()
    }

    fn has_favicon(&self, icon_id: FaviconId) -> bool {
        self.favicon_db.get_favicon_header(icon_id).unwrap().is_some()
    }

    fn has_mapping(&self, page_url: &str) -> bool {
        !self
            .favicon_db
            .get_icon_mappings_for_page_url(page_url)
            .unwrap()
            .is_empty()
    }

    fn url_row(&self, url: &str) -> Option<UrlRow> {
        self.db().get_row_for_url(url).unwrap()
    }

    fn visit_count(&self, url_id: UrlId) -> usize {
        self.db().get_visits_for_url(url_id).unwrap().len()
    }

    fn deleted_urls(&self) -> Vec<String> {
        self.notifier
            .deleted()
            .iter()
            .flat_map(|info| info.deleted_rows().iter().map(|row| row.url.clone()))
            .collect()
    }
}

#[test]
fn delete_favicons_if_possible() {
    let t = ExpireHistoryTest::new();
    let unused = t.add_favicon("http://favicon/unused", FaviconBitmapType::OnVisit, t.now);
    let used = t.add_favicon("http://favicon/used", FaviconBitmapType::OnVisit, t.now);
    t.favicon_db.add_icon_mapping("http://page/", used).unwrap();

    let mut effects = DeleteEffects::default();
    effects.affected_favicons.insert(unused);
    effects.affected_favicons.insert(used);
    t.expirer.delete_favicons_if_possible(&mut effects).unwrap();

    assert!(!t.has_favicon(unused));
    assert!(t.has_favicon(used));
    assert_eq!(effects.deleted_favicons.len(), 1);
    assert!(effects.deleted_favicons.contains("http://favicon/unused"));

    // Running again is harmless.
    t.expirer.delete_favicons_if_possible(&mut effects).unwrap();
    assert_eq!(effects.deleted_favicons.len(), 1);
}

#[test]
fn shared_favicon_survives_until_last_mapping_goes() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();

    t.expirer.delete_url(URL1, Time::max());
    assert!(t.url_row(URL1).is_none());
    assert!(!t.has_mapping(URL1));
    assert!(t.has_favicon(data.favicon1));
    let deleted = t.notifier.deleted();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].favicon_urls().is_empty());

    t.notifier.clear();
    t.expirer.delete_url(URL2, Time::max());
    assert!(!t.has_favicon(data.favicon1));
    let deleted = t.notifier.deleted();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].favicon_urls().contains(FAVICON1));
}

#[test]
fn delete_url_removes_visits_row_and_favicon() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();

    t.expirer.delete_url(URL3, Time::max());

    assert!(t.url_row(URL3).is_none());
    assert_eq!(t.visit_count(data.url_ids[2]), 0);
    assert!(!t.has_favicon(data.favicon2));

    let deleted = t.notifier.deleted();
    assert_eq!(deleted.len(), 1);
    let info = &deleted[0];
    assert!(!info.is_from_expiration());
    assert!(!info.time_range().is_valid());
    assert_eq!(info.deleted_rows().len(), 1);
    assert_eq!(info.deleted_rows()[0].url, URL3);
    assert_eq!(info.favicon_urls().iter().collect::<Vec<_>>(), vec![FAVICON2]);
    assert!(t.notifier.modified().is_empty());
    assert_eq!(t.notifier.visits_deleted.lock().unwrap().len(), 1);
}

#[test]
fn delete_starred_url_keeps_row_and_favicon() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();
    t.bookmarks.add_bookmark(URL1);

    t.expirer.delete_url(URL1, Time::max());

    let row = t.url_row(URL1).expect("starred row survives");
    assert_eq!(row.visit_count, 0);
    assert_eq!(row.typed_count, 1);
    assert!(row.last_visit.is_null());
    assert_eq!(t.visit_count(data.url_ids[0]), 0);
    assert!(t.has_mapping(URL1));
    assert!(t.has_favicon(data.favicon1));

    assert!(t.notifier.deleted().is_empty());
    let modified = t.notifier.modified();
    assert_eq!(modified.len(), 1);
    assert_eq!(modified[0].0[0].url, URL1);
    assert!(!modified[0].1);
}

#[test]
fn delete_starred_url_partially() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();
    t.bookmarks.add_bookmark(URL2);

    t.expirer.delete_url(URL2, data.visit_times[2]);

    let row = t.url_row(URL2).unwrap();
    assert_eq!(row.visit_count, 0);
    assert_eq!(row.typed_count, 0);
    assert!(t.has_favicon(data.favicon1));

    // Nothing at or before t1 once the t2 visit is gone.
    t.bookmarks.remove_bookmark(URL2);
    t.expirer.delete_url(URL2, data.visit_times[1]);
    assert!(t.url_row(URL2).is_none());
}

#[test]
fn delete_url_until_time_keeps_later_visits() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();

    t.expirer.delete_url(URL2, data.visit_times[1]);

    let row = t.url_row(URL2).unwrap();
    assert_eq!(row.visit_count, 1);
    assert_eq!(row.typed_count, 1);
    assert_eq!(row.last_visit, data.visit_times[2]);
    assert!(t.notifier.deleted().is_empty());
    assert_eq!(t.notifier.modified().len(), 1);
}

#[test]
fn delete_urls_reports_once_and_skips_bogus_urls() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();

    t.expirer.delete_urls(
        &[
            URL1.to_string(),
            URL2.to_string(),
            "http://bogus.example/".to_string(),
        ],
        Time::max(),
    );

    let deleted = t.notifier.deleted();
    assert_eq!(deleted.len(), 1);
    let urls: Vec<&str> = deleted[0]
        .deleted_rows()
        .iter()
        .map(|row| row.url.as_str())
        .collect();
    assert_eq!(urls, vec![URL1, URL2]);
    assert!(deleted[0].favicon_urls().contains(FAVICON1));
    assert!(!t.has_favicon(data.favicon1));
    assert!(t.url_row(URL3).is_some());
}

#[test]
fn expire_history_between_updates_and_deletes() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();

    t.expirer
        .expire_history_between(&BTreeSet::new(), data.visit_times[2], Time::null(), true);

    // URL1 is untouched.
    let row1 = t.url_row(URL1).unwrap();
    assert_eq!(row1.visit_count, 1);
    assert_eq!(t.visit_count(data.url_ids[0]), 1);

    // URL2 keeps its t1 visit.
    let row2 = t.url_row(URL2).unwrap();
    assert_eq!(row2.visit_count, 1);
    assert_eq!(row2.typed_count, 0);
    assert_eq!(row2.last_visit, data.visit_times[1]);

    // URL3 and its favicon are gone.
    assert!(t.url_row(URL3).is_none());
    assert!(!t.has_favicon(data.favicon2));
    assert!(t.has_favicon(data.favicon1));

    let modified = t.notifier.modified();
    assert_eq!(modified.len(), 1);
    assert_eq!(modified[0].0.len(), 1);
    assert_eq!(modified[0].0[0].url, URL2);
    assert!(!modified[0].1);

    let deleted = t.notifier.deleted();
    assert_eq!(deleted.len(), 1);
    let info = &deleted[0];
    assert!(!info.is_from_expiration());
    assert_eq!(info.time_range().begin(), Some(data.visit_times[2]));
    assert_eq!(info.time_range().end(), Some(Time::null()));
    assert!(info.restrict_urls().is_none());
    assert_eq!(info.deleted_rows().len(), 1);
    assert_eq!(info.deleted_rows()[0].url, URL3);
    assert_eq!(info.deletion_reason(), DeletionReason::Other);

    // Expiring from t1 removes URL2 entirely; FAVICON1 is still used by URL1.
    t.notifier.clear();
    t.expirer
        .expire_history_between(&BTreeSet::new(), data.visit_times[1], Time::null(), true);
    assert!(t.url_row(URL2).is_none());
    assert!(t.has_favicon(data.favicon1));
    assert_eq!(t.deleted_urls(), vec![URL2.to_string()]);
}

#[test]
fn expire_history_between_background_flag() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();

    t.expirer
        .expire_history_between(&BTreeSet::new(), data.visit_times[2], Time::null(), false);

    assert!(t.notifier.modified()[0].1);
    assert!(t.notifier.deleted()[0].is_from_expiration());
}

#[test]
fn expire_history_between_restricted() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();
    let restrict: BTreeSet<String> = [URL2.to_string()].into();

    t.expirer
        .expire_history_between(&restrict, Time::null(), Time::null(), true);

    assert!(t.url_row(URL2).is_none());
    assert_eq!(t.visit_count(data.url_ids[1]), 0);
    assert!(t.url_row(URL1).is_some());
    assert!(t.url_row(URL3).is_some());

    let deleted = t.notifier.deleted();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].restrict_urls(), Some(&restrict));
    assert!(deleted[0].is_all_history());
}

#[test]
fn expire_history_between_reports_empty_range() {
    let t = ExpireHistoryTest::new();
    t.add_example_data();

    // Nothing lives this far back, yet the cleared range is still reported.
    t.expirer.expire_history_between(
        &BTreeSet::new(),
        Time::from_internal_value(1),
        Time::from_internal_value(2),
        true,
    );
    let deleted = t.notifier.deleted();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].deleted_rows().is_empty());
    assert!(deleted[0].time_range().is_valid());

    // An inverted range does nothing at all.
    t.notifier.clear();
    t.expirer.expire_history_between(
        &BTreeSet::new(),
        Time::from_internal_value(2),
        Time::from_internal_value(1),
        true,
    );
    assert!(t.notifier.deleted().is_empty());
}

#[test]
fn expire_history_for_times() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();

    t.expirer
        .expire_history_for_times(&[data.visit_times[0], data.visit_times[3]]);

    assert!(t.url_row(URL1).is_none());
    assert!(t.url_row(URL3).is_none());
    assert_eq!(t.url_row(URL2).unwrap().visit_count, 2);

    let deleted = t.notifier.deleted();
    assert_eq!(deleted.len(), 1);
    assert!(!deleted[0].time_range().is_valid());
    assert!(!deleted[0].is_from_expiration());
    assert_eq!(deleted[0].deleted_rows().len(), 2);
}

#[test]
fn expire_visits_reports_reason() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();
    let visits = t.db().get_visits_for_url(data.url_ids[2]).unwrap();

    t.expirer.expire_visits(&visits, DeletionReason::Sync);

    let deleted = t.notifier.deleted();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].deletion_reason(), DeletionReason::Sync);
    assert_eq!(deleted[0].deleted_rows()[0].url, URL3);
}

#[test]
fn redirect_source_is_expired_with_target() {
    let t = ExpireHistoryTest::new();
    let (url_a, visit_a) = t.add_visited_url(
        "http://a.example/",
        t.now - minutes(1),
        None,
        PageTransition::LINK.with_qualifiers(PageTransition::CHAIN_START),
    );
    let (url_b, visit_b) = t.add_visited_url(
        "http://b.example/",
        t.now,
        Some(visit_a.id),
        PageTransition::LINK
            .with_qualifiers(PageTransition::CHAIN_END | PageTransition::SERVER_REDIRECT),
    );

    t.expirer.expire_visits(&[visit_b], DeletionReason::Other);

    assert!(t.db().get_row_for_visit(visit_a.id).unwrap().is_none());
    assert!(t.db().get_url_row(url_a).unwrap().is_none());
    assert!(t.db().get_url_row(url_b).unwrap().is_none());
}

#[test]
fn ordinary_referrer_is_not_expired() {
    let t = ExpireHistoryTest::new();
    let chain = PageTransition::CHAIN_START | PageTransition::CHAIN_END;
    let (url_a, visit_a) = t.add_visited_url(
        "http://a.example/",
        t.now - minutes(1),
        None,
        PageTransition::LINK.with_qualifiers(chain),
    );
    let (_, visit_b) = t.add_visited_url(
        "http://b.example/",
        t.now,
        Some(visit_a.id),
        PageTransition::LINK.with_qualifiers(chain),
    );

    t.expirer.expire_visits(&[visit_b], DeletionReason::Other);

    assert!(t.db().get_row_for_visit(visit_a.id).unwrap().is_some());
    assert_eq!(t.db().get_url_row(url_a).unwrap().unwrap().visit_count, 1);
}

#[test]
fn referrer_cycle_is_expired_once() {
    let t = ExpireHistoryTest::new();
    let (url_a, mut visit_a) =
        t.add_visited_url("http://a.example/", t.now - minutes(1), None, PageTransition::LINK);
    let (url_b, visit_b) =
        t.add_visited_url("http://b.example/", t.now, Some(visit_a.id), PageTransition::LINK);
    visit_a.referring_visit = Some(visit_b.id);
    t.db().update_visit_row(&visit_a).unwrap();

    t.expirer.expire_visits(&[visit_b.clone()], DeletionReason::Other);

    let mut deleted: Vec<VisitId> = t
        .notifier
        .visits_deleted
        .lock()
        .unwrap()
        .iter()
        .map(|visit| visit.id)
        .collect();
    deleted.sort_unstable();
    assert_eq!(deleted, vec![visit_a.id, visit_b.id]);
    assert!(t.db().get_url_row(url_a).unwrap().is_none());
    assert!(t.db().get_url_row(url_b).unwrap().is_none());
}

#[test]
fn context_annotations_are_deleted() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();
    let visits = t.db().get_visits_for_url(data.url_ids[1]).unwrap();
    let annotations = VisitContextAnnotations {
        omnibox_url_copied: true,
        ..Default::default()
    };
    for visit in &visits {
        t.db()
            .add_context_annotations_for_visit(visit.id, &annotations)
            .unwrap();
    }

    t.expirer.delete_url(URL2, Time::max());

    for visit in &visits {
        assert!(t
            .db()
            .get_context_annotations_for_visit(visit.id)
            .unwrap()
            .is_none());
    }
}

#[test]
fn expire_some_old_history_partial_batch() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();

    assert!(!t
        .expirer
        .expire_some_old_history(data.visit_times[0], &AllVisitsReader, 2));

    let deleted = t.notifier.deleted();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].is_from_expiration());
    assert!(!deleted[0].time_range().is_valid());
    assert_eq!(deleted[0].deleted_rows().len(), 1);
    assert_eq!(deleted[0].deleted_rows()[0].url, URL1);
    assert_eq!(t.visit_count(data.url_ids[1]), 2);
}

#[test]
fn expire_some_old_history_batch_boundaries() {
    // Exactly N eligible visits.
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();
    assert!(t
        .expirer
        .expire_some_old_history(data.visit_times[1], &AllVisitsReader, 2));

    // N + 1 eligible visits capped at N.
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();
    assert!(t
        .expirer
        .expire_some_old_history(data.visit_times[3], &AllVisitsReader, 3));
    assert_eq!(t.visit_count(data.url_ids[2]), 1);

    // Fewer than N.
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();
    assert!(!t
        .expirer
        .expire_some_old_history(data.visit_times[3], &AllVisitsReader, 5));
    assert!(t.url_row(URL3).is_none());

    // A zero batch reads nothing.
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();
    assert!(!t
        .expirer
        .expire_some_old_history(data.visit_times[3], &AllVisitsReader, 0));
    assert!(t.url_row(URL1).is_some());
}

#[test]
fn expire_some_old_history_keeps_starred_rows() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();
    t.bookmarks.add_bookmark(URL1);

    assert!(!t
        .expirer
        .expire_some_old_history(data.visit_times[0], &AllVisitsReader, 10));

    let row = t.url_row(URL1).unwrap();
    assert_eq!(row.visit_count, 0);
    assert!(row.last_visit.is_null());
    assert!(t.notifier.deleted().is_empty());
    let modified = t.notifier.modified();
    assert!(modified[0].1);
}

#[test]
fn auto_subframe_reader_expires_only_subframes() {
    let t = ExpireHistoryTest::new();
    let data = t.add_example_data();
    let (frame_url, _) = t.add_visited_url(
        "http://frame.example/",
        data.visit_times[1],
        None,
        PageTransition::AUTO_SUBFRAME,
    );

    assert!(!t
        .expirer
        .expire_some_old_history(t.now, &AutoSubframeVisitsReader, 10));

    assert!(t.db().get_url_row(frame_url).unwrap().is_none());
    assert_eq!(t.visit_count(data.url_ids[0]), 1);
    assert_eq!(t.visit_count(data.url_ids[1]), 2);
    assert!(t.db().get_early_expiration_threshold().unwrap() > data.visit_times[3]);
}

#[test]
fn expire_history_before_runs_all_batches() {
    let config = ExpiryConfig {
        expire_batch_size: 1,
        ..Default::default()
    };
    let t = ExpireHistoryTest::with_config(config);
    let data = t.add_example_data();

    t.expirer.expire_history_before(data.visit_times[2]);

    assert!(t.url_row(URL1).is_none());
    assert!(t.url_row(URL2).is_none());
    assert_eq!(t.visit_count(data.url_ids[2]), 1);
    // One report per batch that deleted a URL.
    assert_eq!(t.deleted_urls(), vec![URL1.to_string(), URL2.to_string()]);
}

#[test]
fn on_demand_favicons_are_cleared_with_debounce() {
    let mut t = ExpireHistoryTest::new();
    let data = t.add_example_data();
    let on_demand = t.add_favicon(
        "http://favicon/on-demand",
        FaviconBitmapType::OnDemand,
        t.now - days(60),
    );
    t.favicon_db
        .add_icon_mapping("http://on-demand.example/", on_demand)
        .unwrap();
    let threshold = t.now - days(30);

    t.expirer.clear_old_on_demand_favicons_if_possible(threshold);
    assert!(!t.has_favicon(on_demand));
    assert!(t.has_favicon(data.favicon1));
    assert_eq!(t.notifier.favicons_changed.lock().unwrap().len(), 1);

    // Another old favicon shows up, but the sweep ran five minutes ago.
    let late = t.add_favicon(
        "http://favicon/late",
        FaviconBitmapType::OnDemand,
        t.now - days(60),
    );
    t.favicon_db
        .add_icon_mapping("http://late.example/", late)
        .unwrap();
    t.expirer
        .clear_old_on_demand_favicons_if_possible(threshold + minutes(5));
    assert!(t.has_favicon(late));

    t.expirer
        .clear_old_on_demand_favicons_if_possible(threshold + days(2));
    assert!(!t.has_favicon(late));
}

#[test]
fn on_demand_favicon_kept_for_any_starred_page() {
    let mut t = ExpireHistoryTest::new();
    let icon = t.add_favicon(
        "http://favicon/shared",
        FaviconBitmapType::OnDemand,
        t.now - days(60),
    );
    t.favicon_db.add_icon_mapping("http://one.example/", icon).unwrap();
    t.favicon_db.add_icon_mapping("http://two.example/", icon).unwrap();
    t.bookmarks.add_bookmark("http://two.example/");

    t.expirer
        .clear_old_on_demand_favicons_if_possible(t.now - days(30));

    assert!(t.has_favicon(icon));
    assert!(t.has_mapping("http://one.example/"));
}

#[test]
fn metrics_count_deleted_rows() {
    let registry = prometheus::Registry::new();
    let metrics = ExpiryMetrics::new(&registry).unwrap();
    let mut t = ExpireHistoryTest::new();
    let mut expirer = ExpireHistoryBackend::new(
        t.notifier.clone(),
        Some(t.bookmarks.clone()),
        ExpiryConfig::default(),
    )
    .with_metrics(metrics.clone());
    expirer.set_databases(Some(t.main_db.clone()), Some(t.favicon_db.clone()));
    t.expirer = expirer;
    t.add_example_data();

    t.expirer
        .expire_history_between(&BTreeSet::new(), Time::null(), Time::null(), true);

    assert_eq!(metrics.visits_expired.get(), 4);
    assert_eq!(metrics.urls_deleted.get(), 3);
    assert_eq!(metrics.favicons_deleted.get(), 2);
}

/// History store whose visit or URL deletions can be switched to fail.
struct FlakyHistoryStore {
    inner: HistoryDatabase<MemoryDatabase>,
    fail_visit_deletes: AtomicBool,
    fail_url_deletes: AtomicBool,
}

impl FlakyHistoryStore {
    fn new() -> Self {
        Self {
            inner: HistoryDatabase::new(Arc::new(MemoryDatabase::new())),
            fail_visit_deletes: AtomicBool::new(false),
            fail_url_deletes: AtomicBool::new(false),
        }
    }

    fn check(flag: &AtomicBool) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::DatabaseError("disk full".to_string()));
        }
        Ok(())
    }
}

impl HistoryStore for FlakyHistoryStore {
    fn get_url_row(&self, id: UrlId) -> StorageResult<Option<UrlRow>> {
        self.inner.get_url_row(id)
    }

    fn get_row_for_url(&self, url: &str) -> StorageResult<Option<UrlRow>> {
        self.inner.get_row_for_url(url)
    }

    fn add_url(&self, row: &UrlRow) -> StorageResult<UrlId> {
        self.inner.add_url(row)
    }

    fn update_url_row(&self, row: &UrlRow) -> StorageResult<()> {
        self.inner.update_url_row(row)
    }

    fn delete_url_row(&self, id: UrlId) -> StorageResult<()> {
        Self::check(&self.fail_url_deletes)?;
        self.inner.delete_url_row(id)
    }

    fn add_visit(&self, visit: &mut VisitRow) -> StorageResult<VisitId> {
        self.inner.add_visit(visit)
    }

    fn get_row_for_visit(&self, id: VisitId) -> StorageResult<Option<VisitRow>> {
        self.inner.get_row_for_visit(id)
    }

    fn update_visit_row(&self, visit: &VisitRow) -> StorageResult<()> {
        self.inner.update_visit_row(visit)
    }

    fn delete_visit(&self, visit: &VisitRow) -> StorageResult<Vec<VisitRow>> {
        Self::check(&self.fail_visit_deletes)?;
        self.inner.delete_visit(visit)
    }

    fn get_visits_for_url(&self, url_id: UrlId) -> StorageResult<Vec<VisitRow>> {
        self.inner.get_visits_for_url(url_id)
    }

    fn get_most_recent_visit_for_url(&self, url_id: UrlId) -> StorageResult<Option<VisitRow>> {
        self.inner.get_most_recent_visit_for_url(url_id)
    }

    fn get_all_visits_in_range(
        &self,
        begin: Time,
        end: Time,
        max: usize,
    ) -> StorageResult<Vec<VisitRow>> {
        self.inner.get_all_visits_in_range(begin, end, max)
    }

    fn get_visits_in_range_for_transition(
        &self,
        begin: Time,
        end: Time,
        max: usize,
        transition: PageTransition,
    ) -> StorageResult<Vec<VisitRow>> {
        self.inner
            .get_visits_in_range_for_transition(begin, end, max, transition)
    }

    fn get_visits_for_times(&self, times: &[Time]) -> StorageResult<Vec<VisitRow>> {
        self.inner.get_visits_for_times(times)
    }

    fn add_context_annotations_for_visit(
        &self,
        visit_id: VisitId,
        annotations: &VisitContextAnnotations,
    ) -> StorageResult<()> {
        self.inner
            .add_context_annotations_for_visit(visit_id, annotations)
    }

    fn get_context_annotations_for_visit(
        &self,
        visit_id: VisitId,
    ) -> StorageResult<Option<VisitContextAnnotations>> {
        self.inner.get_context_annotations_for_visit(visit_id)
    }

    fn delete_annotations_for_visit(&self, visit_id: VisitId) -> StorageResult<()> {
        self.inner.delete_annotations_for_visit(visit_id)
    }

    fn get_early_expiration_threshold(&self) -> StorageResult<Time> {
        self.inner.get_early_expiration_threshold()
    }

    fn update_early_expiration_threshold(&self, threshold: Time) -> StorageResult<()> {
        self.inner.update_early_expiration_threshold(threshold)
    }

    fn begin_transaction(&self) -> StorageResult<()> {
        self.inner.begin_transaction()
    }

    fn commit_transaction(&self) -> StorageResult<()> {
        self.inner.commit_transaction()
    }

    fn rollback_transaction(&self) {
        self.inner.rollback_transaction()
    }

    fn flush(&self) -> StorageResult<()> {
        self.inner.flush()
    }
}

#[test]
fn store_failure_suppresses_notifications() {
    let registry = prometheus::Registry::new();
    let metrics = ExpiryMetrics::new(&registry).unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(FlakyHistoryStore::new());
    let url_id = store.add_url(&UrlRow::new(URL1)).unwrap();
    let mut visit = VisitRow::new(
        url_id,
        Time::from_unix_seconds(10),
        None,
        PageTransition::LINK,
        false,
    );
    store.add_visit(&mut visit).unwrap();

    let mut expirer = ExpireHistoryBackend::new(notifier.clone(), None, ExpiryConfig::default())
        .with_metrics(metrics.clone());
    expirer.set_databases(Some(store.clone()), None);

    store.fail_visit_deletes.store(true, Ordering::SeqCst);
    expirer.delete_url(URL1, Time::max());
    assert!(!expirer.expire_some_old_history(Time::max(), &AllVisitsReader, 10));
    assert!(notifier.deleted().is_empty());
    assert!(notifier.visits_deleted.lock().unwrap().is_empty());
    assert_eq!(metrics.store_errors.get(), 2);

    store.fail_visit_deletes.store(false, Ordering::SeqCst);
    expirer.delete_url(URL1, Time::max());
    assert_eq!(notifier.deleted().len(), 1);
}

#[test]
fn failed_batch_is_rolled_back() {
    let registry = prometheus::Registry::new();
    let metrics = ExpiryMetrics::new(&registry).unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(FlakyHistoryStore::new());
    let favicon_db = Arc::new(FaviconDatabase::new(Arc::new(MemoryDatabase::new())));

    let mut row = UrlRow::new(URL1);
    row.visit_count = 1;
    let url_id = store.add_url(&row).unwrap();
    let mut visit = VisitRow::new(
        url_id,
        Time::from_unix_seconds(10),
        None,
        PageTransition::AUTO_SUBFRAME,
        false,
    );
    store.add_visit(&mut visit).unwrap();
    let icon = favicon_db.add_favicon(FAVICON1, IconType::Favicon).unwrap();
    favicon_db.add_icon_mapping(URL1, icon).unwrap();

    let mut expirer = ExpireHistoryBackend::new(notifier.clone(), None, ExpiryConfig::default())
        .with_metrics(metrics.clone());
    expirer.set_databases(Some(store.clone()), Some(favicon_db.clone()));
    let threshold = store.get_early_expiration_threshold().unwrap();

    // The visit and the icon mapping are removed before the URL row fails.
    store.fail_url_deletes.store(true, Ordering::SeqCst);
    let end = Time::from_unix_seconds(100);
    assert!(!expirer.expire_some_old_history(end, &AutoSubframeVisitsReader, 10));
    assert!(!expirer.expire_some_old_history(end, &AllVisitsReader, 10));
    assert_eq!(metrics.store_errors.get(), 2);
    assert!(notifier.deleted().is_empty());

    let row = store.get_row_for_url(URL1).unwrap().unwrap();
    assert_eq!(row.visit_count, 1);
    assert_eq!(store.get_visits_for_url(url_id).unwrap().len(), 1);
    assert_eq!(store.get_early_expiration_threshold().unwrap(), threshold);
    assert_eq!(favicon_db.get_icon_mappings_for_page_url(URL1).unwrap().len(), 1);
    assert!(favicon_db.get_favicon_header(icon).unwrap().is_some());

    // A later sweep finds the same work and completes it.
    store.fail_url_deletes.store(false, Ordering::SeqCst);
    expirer.expire_history_before(end);
    assert!(store.get_row_for_url(URL1).unwrap().is_none());
    assert!(store.get_visits_for_url(url_id).unwrap().is_empty());
    assert!(favicon_db.get_favicon_header(icon).unwrap().is_none());
    assert_eq!(notifier.deleted().len(), 1);
}

#[test]
fn detached_store_is_a_no_op() {
    let mut t = ExpireHistoryTest::new();
    t.add_example_data();
    t.expirer.set_databases(None, None);

    t.expirer.delete_url(URL1, Time::max());
    t.expirer
        .expire_history_between(&BTreeSet::new(), Time::null(), Time::null(), true);
    t.expirer.expire_history_before(t.now);

    assert!(t.notifier.deleted().is_empty());
    assert!(t.url_row(URL1).is_some());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A redirect chain is expired in full when its last hop is, while the
    /// page that linked into the chain survives.
    #[test]
    fn redirect_chain_expired_in_full(hops in 1usize..8) {
        let t = ExpireHistoryTest::new();
        let (source_url, source) = t.add_visited_url(
            "http://source.example/",
            t.now - days(1),
            None,
            PageTransition::LINK.with_qualifiers(
                PageTransition::CHAIN_START | PageTransition::CHAIN_END,
            ),
        );

        let mut previous = t.add_visited_url(
            "http://hop0.example/",
            t.now - minutes(60),
            Some(source.id),
            PageTransition::LINK.with_qualifiers(PageTransition::CHAIN_START),
        ).1;
        let mut chain = vec![previous.id];
        for hop in 1..=hops {
            let qualifiers = if hop == hops {
                PageTransition::CHAIN_END | PageTransition::SERVER_REDIRECT
            } else {
                PageTransition::SERVER_REDIRECT
            };
            previous = t.add_visited_url(
                &format!("http://hop{hop}.example/"),
                t.now - minutes(60 - hop as u64),
                Some(previous.id),
                PageTransition::LINK.with_qualifiers(qualifiers),
            ).1;
            chain.push(previous.id);
        }

        t.expirer.expire_visits(&[previous], DeletionReason::Other);

        for id in &chain {
            prop_assert!(t.db().get_row_for_visit(*id).unwrap().is_none());
        }
        prop_assert!(t.db().get_row_for_visit(source.id).unwrap().is_some());
        prop_assert!(t.db().get_url_row(source_url).unwrap().is_some());
        prop_assert_eq!(t.deleted_urls().len(), hops + 1);
    }
}
