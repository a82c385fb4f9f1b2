use history_types::{Time, UrlRow};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletionReason {
    #[default]
    Other,
    /// Removal requested by a sync peer.
    Sync,
}

/// Time span covered by a deletion. Invalid when the deletion was not
/// time-bounded (explicit URLs, explicit visit times, background expiry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeletionTimeRange {
    range: Option<(Time, Time)>,
}

impl DeletionTimeRange {
    pub fn invalid() -> Self {
        Self { range: None }
    }

    pub fn all_time() -> Self {
        Self::new(Time::null(), Time::max())
    }

    /// A null `end` means "no upper bound". A non-null `end` before `begin`
    /// yields an invalid range.
    pub fn new(begin: Time, end: Time) -> Self {
        if !end.is_null() && end < begin {
            return Self::invalid();
        }
        Self {
            range: Some((begin, end)),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.range.is_some()
    }

    pub fn is_all_time(&self) -> bool {
        matches!(self.range, Some((begin, end)) if begin.is_null() && (end.is_null() || end.is_max()))
    }

    pub fn begin(&self) -> Option<Time> {
        self.range.map(|(begin, _)| begin)
    }

    pub fn end(&self) -> Option<Time> {
        self.range.map(|(_, end)| end)
    }
}

/// Everything a single deletion removed, handed to the notifier once the
/// store mutation has been committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionInfo {
    time_range: DeletionTimeRange,
    is_from_expiration: bool,
    deleted_rows: Vec<UrlRow>,
    favicon_urls: BTreeSet<String>,
    restrict_urls: Option<BTreeSet<String>>,
    deletion_reason: DeletionReason,
}

impl DeletionInfo {
    pub fn new(
        time_range: DeletionTimeRange,
        is_from_expiration: bool,
        deleted_rows: Vec<UrlRow>,
        favicon_urls: BTreeSet<String>,
        restrict_urls: Option<BTreeSet<String>>,
    ) -> Self {
        Self {
            time_range,
            is_from_expiration,
            deleted_rows,
            favicon_urls,
            restrict_urls,
            deletion_reason: DeletionReason::Other,
        }
    }

    pub fn for_all_history() -> Self {
        Self::new(
            DeletionTimeRange::all_time(),
            false,
            Vec::new(),
            BTreeSet::new(),
            None,
        )
    }

    pub fn for_urls(deleted_rows: Vec<UrlRow>, favicon_urls: BTreeSet<String>) -> Self {
        Self::new(
            DeletionTimeRange::invalid(),
            false,
            deleted_rows,
            favicon_urls,
            None,
        )
    }

    pub fn with_reason(mut self, reason: DeletionReason) -> Self {
        self.deletion_reason = reason;
        self
    }

    pub fn is_all_history(&self) -> bool {
        self.time_range.is_all_time()
    }

    pub fn time_range(&self) -> DeletionTimeRange {
        self.time_range
    }

    pub fn is_from_expiration(&self) -> bool {
        self.is_from_expiration
    }

    pub fn deleted_rows(&self) -> &[UrlRow] {
        &self.deleted_rows
    }

    pub fn favicon_urls(&self) -> &BTreeSet<String> {
        &self.favicon_urls
    }

    pub fn restrict_urls(&self) -> Option<&BTreeSet<String>> {
        self.restrict_urls.as_ref()
    }

    pub fn deletion_reason(&self) -> DeletionReason {
        self.deletion_reason
    }
}
