use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{Time, TypesError};

pub type FaviconId = i64;
pub type FaviconBitmapId = i64;
pub type IconMappingId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IconType {
    #[default]
    Favicon,
    TouchIcon,
    TouchPrecomposedIcon,
    WebManifestIcon,
}

impl FromStr for IconType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "favicon" => Ok(IconType::Favicon),
            "touch_icon" => Ok(IconType::TouchIcon),
            "touch_precomposed_icon" => Ok(IconType::TouchPrecomposedIcon),
            "web_manifest_icon" => Ok(IconType::WebManifestIcon),
            _ => Err(TypesError::InvalidIconType(s.to_string())),
        }
    }
}

/// How a bitmap entered the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FaviconBitmapType {
    /// Fetched while visiting the page.
    #[default]
    OnVisit,
    /// Fetched lazily for a page that may never have been visited. Subject
    /// to the separate on-demand aging policy.
    OnDemand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaviconHeader {
    pub id: FaviconId,
    pub icon_url: String,
    pub icon_type: IconType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaviconBitmap {
    pub id: FaviconBitmapId,
    pub icon_id: FaviconId,
    pub bitmap_type: FaviconBitmapType,
    pub last_updated: Time,
    /// Last time an on-demand bitmap was requested. Null for on-visit bitmaps.
    pub last_requested: Time,
    pub data: Vec<u8>,
    pub pixel_size: PixelSize,
}

/// A page URL mapped to a favicon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconMapping {
    pub id: IconMappingId,
    pub page_url: String,
    pub icon_id: FaviconId,
    pub icon_url: String,
    pub icon_type: IconType,
}

/// An on-demand favicon old enough to expire, with every page mapped to it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IconMappingsForExpiry {
    pub icon_url: String,
    pub page_urls: Vec<String>,
}
