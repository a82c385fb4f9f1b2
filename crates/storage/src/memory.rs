use crate::{Database, DatabaseIterator, KeyValue, Result, StorageError, WriteBatch};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// Ordered in-memory key-value store. Clones share the same table, so a
/// history and favicon store can be handed the same instance in tests.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    data: Arc<RwLock<Table>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored keys, index entries included.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl Database for MemoryDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.write().remove(key);
        Ok(())
    }

    fn batch(&self) -> Box<dyn WriteBatch> {
        Box::new(MemoryBatch::new())
    }

    fn write_batch(&self, batch: Box<dyn WriteBatch>) -> Result<()> {
        let batch = batch
            .into_any()
            .downcast::<MemoryBatch>()
            .map_err(|_| StorageError::InvalidData("Invalid batch type".to_string()))?;

        let mut data = self.write();
        for op in batch.operations {
            match op {
                BatchOp::Put(key, value) => {
                    data.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    data.remove(&key);
                }
            }
        }

        Ok(())
    }

    fn iter(&self) -> Box<dyn DatabaseIterator + '_> {
        let entries: Vec<_> = self
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Box::new(MemoryIterator::new(entries))
    }

    fn iter_from(&self, start_key: &[u8]) -> Box<dyn DatabaseIterator + '_> {
        let entries: Vec<_> = self
            .read()
            .range(start_key.to_vec()..)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Box::new(MemoryIterator::new(entries))
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Box<dyn DatabaseIterator + '_> {
        let entries: Vec<_> = self
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Box::new(MemoryIterator::new(entries))
    }
}

#[derive(Debug)]
enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Operations applied under one write lock in `write_batch`.
#[derive(Debug)]
struct MemoryBatch {
    operations: Vec<BatchOp>,
}

impl MemoryBatch {
    fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }
}

impl WriteBatch for MemoryBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.operations
            .push(BatchOp::Put(key.to_vec(), value.to_vec()));
    }

    fn delete(&mut self, key: &[u8]) {
        self.operations.push(BatchOp::Delete(key.to_vec()));
    }

    fn clear(&mut self) {
        self.operations.clear();
    }

    fn len(&self) -> usize {
        self.operations.len()
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}

/// Snapshot of the matching entries, taken when the iterator is created.
struct MemoryIterator {
    entries: Vec<KeyValue>,
    position: usize,
}

impl MemoryIterator {
    fn new(entries: Vec<KeyValue>) -> Self {
        Self {
            entries,
            position: 0,
        }
    }
}

impl DatabaseIterator for MemoryIterator {
    fn next(&mut self) -> Option<Result<KeyValue>> {
        let entry = self.entries.get(self.position)?.clone();
        self.position += 1;
        Some(Ok(entry))
    }

    fn seek(&mut self, key: &[u8]) -> Option<Result<KeyValue>> {
        self.position = self
            .entries
            .iter()
            .position(|(k, _)| k.as_slice() >= key)
            .unwrap_or(self.entries.len());

        self.next()
    }
}
