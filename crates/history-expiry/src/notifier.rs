use history_types::{UrlRow, VisitRow};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::DeletionInfo;

/// Why a surviving visit row changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitUpdateReason {
    UpdateVisitDuration,
    UpdateTransition,
    /// The visit's referrer was deleted and it now points at the referrer's
    /// own referrer.
    UpdateReferringVisit,
}

/// Receives every change the expiration engine makes. Called synchronously
/// after the change is committed; implementations must not block for long.
pub trait HistoryBackendNotifier: Send + Sync {
    fn notify_favicons_changed(&self, page_urls: &BTreeSet<String>, icon_url: &str);

    fn notify_urls_modified(&self, changed_urls: &[UrlRow], is_from_expiration: bool);

    fn notify_urls_deleted(&self, deletion_info: DeletionInfo);

    fn notify_visit_updated(&self, visit: &VisitRow, reason: VisitUpdateReason);

    fn notify_visit_deleted(&self, visit: &VisitRow);
}

/// Notifier that reports changes through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl HistoryBackendNotifier for TracingNotifier {
    fn notify_favicons_changed(&self, page_urls: &BTreeSet<String>, icon_url: &str) {
        info!(icon_url, pages = page_urls.len(), "Favicon removed");
    }

    fn notify_urls_modified(&self, changed_urls: &[UrlRow], is_from_expiration: bool) {
        for row in changed_urls {
            debug!(
                url = %row.url,
                visit_count = row.visit_count,
                typed_count = row.typed_count,
                "URL modified"
            );
        }
        info!(
            count = changed_urls.len(),
            is_from_expiration, "URLs modified"
        );
    }

    fn notify_urls_deleted(&self, deletion_info: DeletionInfo) {
        for row in deletion_info.deleted_rows() {
            debug!(url = %row.url, "URL deleted");
        }
        info!(
            count = deletion_info.deleted_rows().len(),
            favicons = deletion_info.favicon_urls().len(),
            is_from_expiration = deletion_info.is_from_expiration(),
            time_range = ?deletion_info.time_range(),
            reason = ?deletion_info.deletion_reason(),
            "URLs deleted"
        );
    }

    fn notify_visit_updated(&self, visit: &VisitRow, reason: VisitUpdateReason) {
        debug!(visit_id = visit.id, ?reason, "Visit updated");
    }

    fn notify_visit_deleted(&self, visit: &VisitRow) {
        debug!(visit_id = visit.id, url_id = visit.url_id, "Visit deleted");
    }
}
