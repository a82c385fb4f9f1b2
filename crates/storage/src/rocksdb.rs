use rocksdb::{Direction, IteratorMode, Options, WriteBatch as RocksWriteBatch, DB};
use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use crate::{
    Database, DatabaseIterator, KeyValue, Result, StorageError, WriteBatch as WriteBatchTrait,
};

/// RocksDB tuning knobs exposed through the service configuration.
#[derive(Debug, Clone)]
pub struct RocksOptions {
    pub cache_size_mb: usize,
    pub max_open_files: i32,
}

impl Default for RocksOptions {
    fn default() -> Self {
        Self {
            cache_size_mb: 64,
            max_open_files: 512,
        }
    }
}

pub struct RocksDatabase {
    db: Arc<DB>,
}

impl RocksDatabase {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &RocksOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: &RocksOptions) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        // History rows are small and written in short bursts
        opts.set_write_buffer_size(options.cache_size_mb.max(1) * 1024 * 1024);
        opts.set_max_write_buffer_number(2);
        opts.set_max_open_files(options.max_open_files);
        opts.set_compaction_style(rocksdb::DBCompactionStyle::Level);
        opts.set_bytes_per_sync(1024 * 1024); // 1MB

        let db = DB::open(&opts, path).map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Database for RocksDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| StorageError::DatabaseError(e.to_string()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db
            .put(key, value)
            .map_err(|e| StorageError::DatabaseError(e.to_string()))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.db
            .delete(key)
            .map_err(|e| StorageError::DatabaseError(e.to_string()))
    }

    fn contains(&self, key: &[u8]) -> Result<bool> {
        if !self.db.key_may_exist(key) {
            return Ok(false);
        }
        Ok(self.get(key)?.is_some())
    }

    fn batch(&self) -> Box<dyn WriteBatchTrait> {
        Box::new(RocksBatch::new())
    }

    fn write_batch(&self, batch: Box<dyn WriteBatchTrait>) -> Result<()> {
        let rocks_batch = batch
            .into_any()
            .downcast::<RocksBatch>()
            .map_err(|_| StorageError::InvalidData("Invalid batch type".to_string()))?;

        self.db
            .write(rocks_batch.batch)
            .map_err(|e| StorageError::DatabaseError(e.to_string()))
    }

    fn iter(&self) -> Box<dyn DatabaseIterator + '_> {
        Box::new(RocksIterator {
            iter: self.db.iterator(IteratorMode::Start),
            prefix: None,
        })
    }

    fn iter_from(&self, start_key: &[u8]) -> Box<dyn DatabaseIterator + '_> {
        Box::new(RocksIterator {
            iter: self
                .db
                .iterator(IteratorMode::From(start_key, Direction::Forward)),
            prefix: None,
        })
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Box<dyn DatabaseIterator + '_> {
        // No prefix extractor is configured, so the bound is enforced here.
        Box::new(RocksIterator {
            iter: self
                .db
                .iterator(IteratorMode::From(prefix, Direction::Forward)),
            prefix: Some(prefix.to_vec()),
        })
    }

    fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| StorageError::DatabaseError(e.to_string()))
    }
}

pub struct RocksBatch {
    batch: RocksWriteBatch,
}

impl RocksBatch {
    pub fn new() -> Self {
        Self {
            batch: RocksWriteBatch::default(),
        }
    }
}

impl Default for RocksBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatchTrait for RocksBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.batch.put(key, value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.batch.delete(key);
    }

    fn clear(&mut self) {
        self.batch.clear();
    }

    fn len(&self) -> usize {
        self.batch.len()
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

pub struct RocksIterator<'a> {
    iter: rocksdb::DBIterator<'a>,
    prefix: Option<Vec<u8>>,
}

impl<'a> DatabaseIterator for RocksIterator<'a> {
    fn next(&mut self) -> Option<Result<KeyValue>> {
        let item = self.iter.next()?;
        match item {
            Ok((k, v)) => {
                if let Some(prefix) = &self.prefix {
                    if !k.starts_with(prefix) {
                        return None;
                    }
                }
                Some(Ok((k.to_vec(), v.to_vec())))
            }
            Err(e) => Some(Err(StorageError::DatabaseError(e.to_string()))),
        }
    }

    fn seek(&mut self, key: &[u8]) -> Option<Result<KeyValue>> {
        self.iter.set_mode(IteratorMode::From(key, Direction::Forward));
        self.next()
    }
}
