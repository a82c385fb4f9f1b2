use serde::{Deserialize, Serialize};

use crate::Time;

pub type UrlId = i64;

/// One unique URL ever visited, with its aggregate visit counters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UrlRow {
    /// Row id assigned by the store; 0 until the row is added.
    pub id: UrlId,
    pub url: String,
    pub title: String,
    pub visit_count: i32,
    /// Number of explicit address-bar navigations.
    pub typed_count: i32,
    pub last_visit: Time,
    pub hidden: bool,
}

impl UrlRow {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_id(id: UrlId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            ..Default::default()
        }
    }
}
