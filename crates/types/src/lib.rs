pub mod annotations;
pub mod favicon;
pub mod time;
pub mod transition;
pub mod url_row;
pub mod visit;

pub use annotations::VisitContextAnnotations;
pub use favicon::{
    FaviconBitmap, FaviconBitmapId, FaviconBitmapType, FaviconHeader, FaviconId, IconMapping,
    IconMappingId, IconMappingsForExpiry, IconType, PixelSize,
};
pub use time::Time;
pub use transition::PageTransition;
pub use url_row::{UrlId, UrlRow};
pub use visit::{VisitId, VisitRow};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("Invalid time value: {0}")]
    InvalidTime(String),

    #[error("Unknown page transition: {0}")]
    InvalidTransition(String),

    #[error("Unknown icon type: {0}")]
    InvalidIconType(String),
}

pub type Result<T> = std::result::Result<T, TypesError>;
