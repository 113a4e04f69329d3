use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::data::log_record::LogRecordPos;

use super::Indexer;

/// Default keydir, constant time lookups and upserts. Ordering is only
/// established when keys are listed.
pub struct HashMapIndex {
  map: RwLock<HashMap<Vec<u8>, LogRecordPos>>,
}

impl HashMapIndex {
  pub fn new() -> Self {
    Self {
      map: RwLock::new(HashMap::new()),
    }
  }
}

impl Default for HashMapIndex {
  fn default() -> Self {
    Self::new()
  }
}

impl Indexer for HashMapIndex {
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
    self.map.write().insert(key, pos)
  }

  fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
    self.map.read().get(key).copied()
  }

  fn delete(&self, key: &[u8]) -> Option<LogRecordPos> {
    self.map.write().remove(key)
  }

  fn list_keys(&self) -> Vec<Bytes> {
    let read_guard = self.map.read();
    let mut keys: Vec<Bytes> = read_guard
      .keys()
      .map(|k| Bytes::copy_from_slice(k))
      .collect();
    keys.sort();
    keys
  }

  fn entries(&self) -> Vec<(Vec<u8>, LogRecordPos)> {
    let read_guard = self.map.read();
    let mut entries: Vec<_> = read_guard.iter().map(|(k, v)| (k.clone(), *v)).collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
  }

  fn len(&self) -> usize {
    self.map.read().len()
  }
}
