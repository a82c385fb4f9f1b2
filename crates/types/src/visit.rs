use serde::{Deserialize, Serialize};

use crate::{PageTransition, Time, UrlId};

pub type VisitId = i64;

/// One navigation to a URL.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VisitRow {
    pub id: VisitId,
    pub url_id: UrlId,
    pub visit_time: Time,
    /// Visit that led here, if any. Chains may be malformed and cyclic.
    pub referring_visit: Option<VisitId>,
    pub transition: PageTransition,
    /// Whether this visit bumped the owning URL's `typed_count`.
    pub incremented_omnibox_typed_score: bool,
}

impl VisitRow {
    pub fn new(
        url_id: UrlId,
        visit_time: Time,
        referring_visit: Option<VisitId>,
        transition: PageTransition,
        incremented_omnibox_typed_score: bool,
    ) -> Self {
        Self {
            id: 0,
            url_id,
            visit_time,
            referring_visit,
            transition,
            incremented_omnibox_typed_score,
        }
    }
}
