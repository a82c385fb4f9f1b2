use thiserror::Error;

pub mod favicon_db;
pub mod history_db;
pub mod memory;
pub mod rocksdb;
pub mod store;
pub mod traits;
pub mod transaction;

pub use favicon_db::FaviconDatabase;
pub use history_db::HistoryDatabase;
pub use memory::*;
pub use rocksdb::*;
pub use store::{FaviconStore, HistoryStore};
pub use traits::*;
pub use transaction::StagedDatabase;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Key not found")]
    KeyNotFound,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Key-value pair type alias
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Keyspaces of the row stores. Index keyspaces map to empty values; the row
/// ids they point at are encoded in the key suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPrefix {
    Meta = 0x00,
    Url = 0x01,
    UrlBySpec = 0x02,
    Visit = 0x03,
    VisitByTime = 0x04,
    VisitByUrl = 0x05,
    VisitByReferrer = 0x06,
    VisitAnnotations = 0x07,
    Favicon = 0x10,
    FaviconBitmap = 0x11,
    IconMapping = 0x12,
    IconMappingByPage = 0x13,
    IconMappingByIcon = 0x14,
}

impl KeyPrefix {
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    pub fn make_key(&self, suffix: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + suffix.len());
        key.push(self.as_byte());
        key.extend_from_slice(suffix);
        key
    }
}

/// Helper functions for encoding/decoding row and index keys
pub mod keys {
    use super::*;
    use history_types::{FaviconId, Time, UrlId, VisitId};

    const ID_LEN: usize = 8;

    pub fn id_bytes(id: i64) -> [u8; ID_LEN] {
        (id as u64).to_be_bytes()
    }

    /// Big-endian encoding of a timestamp that sorts like the signed value.
    pub fn time_bytes(time: Time) -> [u8; 8] {
        ((time.to_internal_value() as u64) ^ (1 << 63)).to_be_bytes()
    }

    pub fn time_from_bytes(bytes: &[u8]) -> Result<Time> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| StorageError::InvalidData("truncated time key".to_string()))?;
        Ok(Time::from_internal_value(
            (u64::from_be_bytes(raw) ^ (1 << 63)) as i64,
        ))
    }

    /// Id stored in the last eight bytes of an index key.
    pub fn id_suffix(key: &[u8]) -> Result<i64> {
        if key.len() < ID_LEN {
            return Err(StorageError::InvalidData(format!(
                "index key too short: {} bytes",
                key.len()
            )));
        }
        let mut raw = [0u8; ID_LEN];
        raw.copy_from_slice(&key[key.len() - ID_LEN..]);
        Ok(u64::from_be_bytes(raw) as i64)
    }

    fn compound(prefix: KeyPrefix, parts: &[&[u8]]) -> Vec<u8> {
        let mut key = vec![prefix.as_byte()];
        for part in parts {
            key.extend_from_slice(part);
        }
        key
    }

    /// Variable-length component, length-prefixed so one spec is never a
    /// prefix match for a longer one.
    fn spec_component(spec: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + spec.len());
        out.extend_from_slice(&(spec.len() as u32).to_be_bytes());
        out.extend_from_slice(spec.as_bytes());
        out
    }

    pub fn meta_key(name: &str) -> Vec<u8> {
        KeyPrefix::Meta.make_key(name.as_bytes())
    }

    pub fn url_key(id: UrlId) -> Vec<u8> {
        KeyPrefix::Url.make_key(&id_bytes(id))
    }

    pub fn url_by_spec_key(url: &str) -> Vec<u8> {
        KeyPrefix::UrlBySpec.make_key(url.as_bytes())
    }

    pub fn visit_key(id: VisitId) -> Vec<u8> {
        KeyPrefix::Visit.make_key(&id_bytes(id))
    }

    pub fn visit_by_time_prefix(time: Time) -> Vec<u8> {
        KeyPrefix::VisitByTime.make_key(&time_bytes(time))
    }

    pub fn visit_by_time_key(time: Time, id: VisitId) -> Vec<u8> {
        compound(KeyPrefix::VisitByTime, &[&time_bytes(time), &id_bytes(id)])
    }

    pub fn visit_by_url_prefix(url_id: UrlId) -> Vec<u8> {
        KeyPrefix::VisitByUrl.make_key(&id_bytes(url_id))
    }

    pub fn visit_by_url_key(url_id: UrlId, id: VisitId) -> Vec<u8> {
        compound(KeyPrefix::VisitByUrl, &[&id_bytes(url_id), &id_bytes(id)])
    }

    pub fn visit_by_referrer_prefix(referrer: VisitId) -> Vec<u8> {
        KeyPrefix::VisitByReferrer.make_key(&id_bytes(referrer))
    }

    pub fn visit_by_referrer_key(referrer: VisitId, id: VisitId) -> Vec<u8> {
        compound(KeyPrefix::VisitByReferrer, &[&id_bytes(referrer), &id_bytes(id)])
    }

    pub fn annotations_key(visit_id: VisitId) -> Vec<u8> {
        KeyPrefix::VisitAnnotations.make_key(&id_bytes(visit_id))
    }

    pub fn favicon_key(id: FaviconId) -> Vec<u8> {
        KeyPrefix::Favicon.make_key(&id_bytes(id))
    }

    pub fn bitmap_prefix(icon_id: FaviconId) -> Vec<u8> {
        KeyPrefix::FaviconBitmap.make_key(&id_bytes(icon_id))
    }

    pub fn bitmap_key(icon_id: FaviconId, bitmap_id: i64) -> Vec<u8> {
        compound(KeyPrefix::FaviconBitmap, &[&id_bytes(icon_id), &id_bytes(bitmap_id)])
    }

    pub fn icon_mapping_key(id: i64) -> Vec<u8> {
        KeyPrefix::IconMapping.make_key(&id_bytes(id))
    }

    pub fn mapping_by_page_prefix(page_url: &str) -> Vec<u8> {
        KeyPrefix::IconMappingByPage.make_key(&spec_component(page_url))
    }

    pub fn mapping_by_page_key(page_url: &str, mapping_id: i64) -> Vec<u8> {
        compound(
            KeyPrefix::IconMappingByPage,
            &[&spec_component(page_url), &id_bytes(mapping_id)],
        )
    }

    pub fn mapping_by_icon_prefix(icon_id: FaviconId) -> Vec<u8> {
        KeyPrefix::IconMappingByIcon.make_key(&id_bytes(icon_id))
    }

    pub fn mapping_by_icon_key(icon_id: FaviconId, mapping_id: i64) -> Vec<u8> {
        compound(KeyPrefix::IconMappingByIcon, &[&id_bytes(icon_id), &id_bytes(mapping_id)])
    }
}
