use crate::{KeyValue, Result, StorageError};

/// Ordered byte-key store backing the history and favicon tables.
///
/// Iteration is in ascending key order; the key layout in `keys` relies on
/// that for time-ordered visit scans.
pub trait Database: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn batch(&self) -> Box<dyn WriteBatch>;

    /// Applies every operation of `batch` or none of them.
    fn write_batch(&self, batch: Box<dyn WriteBatch>) -> Result<()>;

    fn iter(&self) -> Box<dyn DatabaseIterator + '_>;

    /// Entries with keys at or after `start_key`.
    fn iter_from(&self, start_key: &[u8]) -> Box<dyn DatabaseIterator + '_>;

    fn iter_prefix(&self, prefix: &[u8]) -> Box<dyn DatabaseIterator + '_>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        let mut iter = self.iter_prefix(prefix);
        let mut entries = Vec::new();
        while let Some(entry) = iter.next() {
            entries.push(entry?);
        }
        Ok(entries)
    }
}

/// Pending mutations, committed by `Database::write_batch`.
pub trait WriteBatch: Send {
    fn put(&mut self, key: &[u8], value: &[u8]);

    fn delete(&mut self, key: &[u8]);

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recover the concrete batch inside `Database::write_batch`
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any>;
}

pub trait DatabaseIterator: Send {
    fn next(&mut self) -> Option<Result<KeyValue>>;

    /// Repositions at the first key >= `key` and returns it.
    fn seek(&mut self, key: &[u8]) -> Option<Result<KeyValue>>;
}

pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| StorageError::SerializationError(e.to_string()))
}

/// Bincode-encoded row access.
pub trait TypedDatabase: Database {
    fn get_typed<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_typed<T: serde::Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        self.put(key, &encode(value)?)
    }
}

impl<T: Database + ?Sized> TypedDatabase for T {}

/// Typed puts for write batches
pub trait TypedWriteBatch {
    fn put_typed<T: serde::Serialize>(&mut self, key: &[u8], value: &T) -> Result<()>;
}

impl TypedWriteBatch for Box<dyn WriteBatch> {
    fn put_typed<T: serde::Serialize>(&mut self, key: &[u8], value: &T) -> Result<()> {
        let bytes = encode(value)?;
        self.put(key, &bytes);
        Ok(())
    }
}
