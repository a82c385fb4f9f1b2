//! Write staging over a `Database`.
//!
//! While a transaction is open, every write lands in an in-memory overlay
//! and reads see the overlay on top of the committed data. `commit` applies
//! the overlay as one `WriteBatch`; `rollback` drops it.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::{Database, DatabaseIterator, KeyValue, Result, StorageError, WriteBatch};

/// `None` marks a staged delete.
type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

pub struct StagedDatabase<D: Database> {
    inner: Arc<D>,
    staged: RwLock<Option<Overlay>>,
}

impl<D: Database> StagedDatabase<D> {
    pub fn new(inner: Arc<D>) -> Self {
        Self {
            inner,
            staged: RwLock::new(None),
        }
    }

    pub fn inner(&self) -> &Arc<D> {
        &self.inner
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Overlay>> {
        self.staged.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Overlay>> {
        self.staged.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn in_transaction(&self) -> bool {
        self.read().is_some()
    }

    pub fn begin(&self) -> Result<()> {
        let mut staged = self.write();
        if staged.is_some() {
            return Err(StorageError::InvalidData(
                "transaction already open".to_string(),
            ));
        }
        *staged = Some(Overlay::new());
        Ok(())
    }

    /// Applies the staged writes atomically. If the write fails nothing is
    /// applied and the transaction is closed.
    pub fn commit(&self) -> Result<()> {
        let Some(overlay) = self.write().take() else {
            return Err(StorageError::InvalidData("no open transaction".to_string()));
        };
        if overlay.is_empty() {
            return Ok(());
        }

        let writes = overlay.len();
        let mut batch = self.inner.batch();
        for (key, value) in overlay {
            match value {
                Some(value) => batch.put(&key, &value),
                None => batch.delete(&key),
            }
        }
        self.inner.write_batch(batch)?;
        debug!(writes, "Committed staged writes");
        Ok(())
    }

    /// Drops every staged write. A no-op without an open transaction.
    pub fn rollback(&self) {
        if let Some(overlay) = self.write().take() {
            debug!(writes = overlay.len(), "Rolled back staged writes");
        }
    }

    /// Overlay entries at or after `start`, if a transaction is open.
    fn staged_from(&self, start: &[u8]) -> Option<Vec<(Vec<u8>, Option<Vec<u8>>)>> {
        self.read().as_ref().map(|overlay| {
            overlay
                .range(start.to_vec()..)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }
}

impl<D: Database> Database for StagedDatabase<D> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(overlay) = self.read().as_ref() {
            if let Some(value) = overlay.get(key) {
                return Ok(value.clone());
            }
        }
        self.inner.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some(overlay) = self.write().as_mut() {
            overlay.insert(key.to_vec(), Some(value.to_vec()));
            return Ok(());
        }
        self.inner.put(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        if let Some(overlay) = self.write().as_mut() {
            overlay.insert(key.to_vec(), None);
            return Ok(());
        }
        self.inner.delete(key)
    }

    fn batch(&self) -> Box<dyn WriteBatch> {
        Box::new(StagedBatch::default())
    }

    fn write_batch(&self, batch: Box<dyn WriteBatch>) -> Result<()> {
        let batch = batch
            .into_any()
            .downcast::<StagedBatch>()
            .map_err(|_| StorageError::InvalidData("Invalid batch type".to_string()))?;

        if let Some(overlay) = self.write().as_mut() {
            for (key, value) in batch.operations {
                overlay.insert(key, value);
            }
            return Ok(());
        }

        let mut inner_batch = self.inner.batch();
        for (key, value) in &batch.operations {
            match value {
                Some(value) => inner_batch.put(key, value),
                None => inner_batch.delete(key),
            }
        }
        self.inner.write_batch(inner_batch)
    }

    fn iter(&self) -> Box<dyn DatabaseIterator + '_> {
        match self.staged_from(&[]) {
            Some(staged) => Box::new(MergedIterator::new(self.inner.iter(), staged, None)),
            None => self.inner.iter(),
        }
    }

    fn iter_from(&self, start_key: &[u8]) -> Box<dyn DatabaseIterator + '_> {
        match self.staged_from(start_key) {
            Some(staged) => Box::new(MergedIterator::new(
                self.inner.iter_from(start_key),
                staged,
                None,
            )),
            None => self.inner.iter_from(start_key),
        }
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Box<dyn DatabaseIterator + '_> {
        match self.staged_from(prefix) {
            Some(staged) => Box::new(MergedIterator::new(
                self.inner.iter_prefix(prefix),
                staged,
                Some(prefix.to_vec()),
            )),
            None => self.inner.iter_prefix(prefix),
        }
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}

/// Ordered operations; a later write to the same key wins.
#[derive(Debug, Default)]
struct StagedBatch {
    operations: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteBatch for StagedBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.operations.push((key.to_vec(), Some(value.to_vec())));
    }

    fn delete(&mut self, key: &[u8]) {
        self.operations.push((key.to_vec(), None));
    }

    fn clear(&mut self) {
        self.operations.clear();
    }

    fn len(&self) -> usize {
        self.operations.len()
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Committed entries merged with a snapshot of the overlay. Staged entries
/// shadow committed ones with the same key; staged deletes hide them.
struct MergedIterator<'a> {
    base: Box<dyn DatabaseIterator + 'a>,
    base_head: Option<KeyValue>,
    base_done: bool,
    staged: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    position: usize,
    prefix: Option<Vec<u8>>,
}

impl<'a> MergedIterator<'a> {
    fn new(
        base: Box<dyn DatabaseIterator + 'a>,
        staged: Vec<(Vec<u8>, Option<Vec<u8>>)>,
        prefix: Option<Vec<u8>>,
    ) -> Self {
        Self {
            base,
            base_head: None,
            base_done: false,
            staged,
            position: 0,
            prefix,
        }
    }

    fn accept(&mut self, entry: Option<Result<KeyValue>>) -> Result<()> {
        match entry {
            Some(Ok(kv)) => self.base_head = Some(kv),
            Some(Err(e)) => return Err(e),
            None => self.base_done = true,
        }
        Ok(())
    }
}

impl<'a> DatabaseIterator for MergedIterator<'a> {
    fn next(&mut self) -> Option<Result<KeyValue>> {
        loop {
            if self.base_head.is_none() && !self.base_done {
                let entry = self.base.next();
                if let Err(e) = self.accept(entry) {
                    return Some(Err(e));
                }
            }

            let order = match (&self.base_head, self.staged.get(self.position)) {
                (None, None) => return None,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some((base_key, _)), Some((staged_key, _))) => staged_key.cmp(base_key),
            };
            if order == Ordering::Equal {
                self.base_head = None;
            }
            let take_staged = order != Ordering::Greater;

            let (key, value) = if take_staged {
                let (key, value) = self.staged[self.position].clone();
                self.position += 1;
                match value {
                    Some(value) => (key, value),
                    None => continue,
                }
            } else {
                match self.base_head.take() {
                    Some(kv) => kv,
                    None => continue,
                }
            };

            if let Some(prefix) = &self.prefix {
                if !key.starts_with(prefix) {
                    return None;
                }
            }
            return Some(Ok((key, value)));
        }
    }

    fn seek(&mut self, key: &[u8]) -> Option<Result<KeyValue>> {
        self.base_head = None;
        self.base_done = false;
        let entry = self.base.seek(key);
        if let Err(e) = self.accept(entry) {
            return Some(Err(e));
        }
        self.position = self.staged.partition_point(|(k, _)| k.as_slice() < key);
        self.next()
    }
}
