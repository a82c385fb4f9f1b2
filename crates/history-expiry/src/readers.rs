use history_storage::{HistoryStore, Result};
use history_types::{PageTransition, Time, VisitRow};

/// Selects which visits a background batch expires.
pub trait ExpiringVisitsReader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Replaces `visits` with up to `max_visits` visits older than
    /// `end_time`, oldest first. Returns true if the batch came back full,
    /// meaning more eligible visits probably remain.
    fn read(
        &self,
        end_time: Time,
        db: &dyn HistoryStore,
        visits: &mut Vec<VisitRow>,
        max_visits: usize,
    ) -> Result<bool>;
}

/// Every visit, regardless of transition.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllVisitsReader;

impl ExpiringVisitsReader for AllVisitsReader {
    fn name(&self) -> &'static str {
        "all_visits"
    }

    fn read(
        &self,
        end_time: Time,
        db: &dyn HistoryStore,
        visits: &mut Vec<VisitRow>,
        max_visits: usize,
    ) -> Result<bool> {
        visits.clear();
        if max_visits == 0 {
            return Ok(false);
        }
        *visits = db.get_all_visits_in_range(Time::null(), end_time, max_visits)?;
        Ok(visits.len() == max_visits)
    }
}

/// Automatic subframe navigations only. Resumes from the store's early
/// expiration threshold and advances it once the range is exhausted.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoSubframeVisitsReader;

impl ExpiringVisitsReader for AutoSubframeVisitsReader {
    fn name(&self) -> &'static str {
        "auto_subframe_visits"
    }

    fn read(
        &self,
        end_time: Time,
        db: &dyn HistoryStore,
        visits: &mut Vec<VisitRow>,
        max_visits: usize,
    ) -> Result<bool> {
        visits.clear();
        if max_visits == 0 {
            return Ok(false);
        }
        let begin_time = db.get_early_expiration_threshold()?;
        *visits = db.get_visits_in_range_for_transition(
            begin_time,
            end_time,
            max_visits,
            PageTransition::AUTO_SUBFRAME,
        )?;

        let more = visits.len() == max_visits;
        if !more {
            db.update_early_expiration_threshold(end_time)?;
        }
        Ok(more)
    }
}
