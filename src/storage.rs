//! Optimized storage layer using RocksDB

use crate::config::StorageConfig;
use crate::errors::StorageError;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct CashierStorage {
    db: Arc<DB>,
}

impl CashierStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(128 * 1024 * 1024); // 128MB write buffer for high throughput
        opts.set_max_write_buffer_number(4);
        opts.set_target_file_size_base(128 * 1024 * 1024);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path).map_err(|e| StorageError::OpenFailed(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn new_with_config(config: &StorageConfig) -> Result<Self, StorageError> {
        if config.clear_on_start {
            let _ = DB::destroy(&Options::default(), &config.data_directory);
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        opts.set_max_write_buffer_number(config.max_write_buffer_number as i32);
        opts.set_target_file_size_base((config.target_file_size_mb * 1024 * 1024) as u64);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, &config.data_directory)
            .map_err(|e| StorageError::OpenFailed(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.db.get(key).ok().flatten()
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.db.put(key, value)?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.db.delete(key)?;
        Ok(())
    }

    pub fn batch_write<K, V>(&self, items: &[(K, V)]) -> Result<(), StorageError>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = WriteBatch::default();
        for (key, value) in items {
            batch.put(key, value);
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Scan keys under `prefix`, starting strictly after `cursor` when given.
    /// Returns at most `limit` (key, value) pairs in key order.
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<&[u8]>,
        limit: usize,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let start: &[u8] = cursor.unwrap_or(prefix);
        let iter = self
            .db
            .iterator(IteratorMode::From(start, Direction::Forward));

        let mut rows = Vec::new();
        for item in iter {
            let Ok((key, value)) = item else { break };
            if !key.starts_with(prefix) {
                break;
            }
            // The cursor is the last key of the previous page; skip it.
            if cursor == Some(key.as_ref()) {
                continue;
            }
            rows.push((key.to_vec(), value.to_vec()));
            if rows.len() >= limit {
                break;
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, CashierStorage) {
        let dir = TempDir::new().expect("temp dir");
        let storage = CashierStorage::new(dir.path()).expect("open");
        (dir, storage)
    }

    #[test]
    fn test_put_get_delete() {
        let (_dir, storage) = open_temp();
        storage.put(b"k1", b"v1").unwrap();
        assert_eq!(storage.get(b"k1"), Some(b"v1".to_vec()));
        storage.delete(b"k1").unwrap();
        assert_eq!(storage.get(b"k1"), None);
    }

    #[test]
    fn test_scan_prefix_with_cursor() {
        let (_dir, storage) = open_temp();
        storage.put(b"p:a", b"1").unwrap();
        storage.put(b"p:b", b"2").unwrap();
        storage.put(b"p:c", b"3").unwrap();
        storage.put(b"q:a", b"other").unwrap();

        let page1 = storage.scan_prefix(b"p:", None, 2);
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].0, b"p:a".to_vec());

        let cursor = page1.last().unwrap().0.clone();
        let page2 = storage.scan_prefix(b"p:", Some(&cursor), 2);
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].0, b"p:c".to_vec());
    }
}
