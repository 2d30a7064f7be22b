use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::StateError;

/// Ordered list of puts and deletes applied atomically by [`KvStore::write_batch`].
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push((key.into(), Some(value.into())));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push((key.into(), None));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        self.ops
    }
}

/// Byte-oriented persistent store backing tries, code and the chain.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError>;

    fn has(&self, key: &[u8]) -> Result<bool, StateError> {
        Ok(self.get(key)?.is_some())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StateError>;

    fn delete(&self, key: &[u8]) -> Result<(), StateError>;

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StateError>;
}

/// In-memory store used by tests and the devnet.
#[derive(Debug, Default)]
pub struct MemKv {
    inner: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl KvStore for MemKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StateError> {
        self.inner.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StateError> {
        self.inner.write().remove(key);
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StateError> {
        let mut guard = self.inner.write();
        for (key, value) in batch.into_ops() {
            match value {
                Some(v) => guard.insert(key, v),
                None => guard.remove(&key),
            };
        }
        Ok(())
    }
}

/// RocksDB-backed store.
#[cfg(feature = "rocksdb")]
pub struct RocksKv {
    db: rocksdb::DB,
}

#[cfg(feature = "rocksdb")]
impl RocksKv {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StateError> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        let db = rocksdb::DB::open(&opts, path)?;
        Ok(Self { db })
    }
}

#[cfg(feature = "rocksdb")]
impl KvStore for RocksKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.db.get(key)?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StateError> {
        Ok(self.db.put(key, value)?)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StateError> {
        Ok(self.db.delete(key)?)
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StateError> {
        let mut wb = rocksdb::WriteBatch::default();
        for (key, value) in batch.into_ops() {
            match value {
                Some(v) => wb.put(key, v),
                None => wb.delete(key),
            }
        }
        Ok(self.db.write(wb)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_kv_batch_applies_in_order() {
        let kv = MemKv::new();
        kv.put(b"a", b"1").unwrap();

        let mut batch = WriteBatch::new();
        batch.put(b"b".to_vec(), b"2".to_vec());
        batch.delete(b"a".to_vec());
        batch.put(b"a".to_vec(), b"3".to_vec());
        kv.write_batch(batch).unwrap();

        assert_eq!(kv.get(b"a").unwrap(), Some(b"3".to_vec()));
        assert_eq!(kv.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert!(!kv.has(b"c").unwrap());
        assert_eq!(kv.len(), 2);
    }
}
