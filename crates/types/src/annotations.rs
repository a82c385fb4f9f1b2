use serde::{Deserialize, Serialize};

/// Metadata recorded about a visit after it happened. Opaque to expiration,
/// which only needs to remove it together with its visit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VisitContextAnnotations {
    pub omnibox_url_copied: bool,
    pub is_existing_part_of_tab_group: bool,
    pub is_placed_in_tab_group: bool,
    pub is_existing_bookmark: bool,
    pub is_new_bookmark: bool,
    pub is_ntp_custom_link: bool,
    pub total_foreground_duration_us: Option<i64>,
    pub page_end_reason: u32,
}
