use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use crate::data::log_record::LogRecordPos;

use super::Indexer;

/// Lock-free ordered keydir.
pub struct SkipList {
  skl: SkipMap<Vec<u8>, LogRecordPos>,
}

impl SkipList {
  pub fn new() -> Self {
    Self {
      skl: SkipMap::new(),
    }
  }
}

impl Default for SkipList {
  fn default() -> Self {
    Self::new()
  }
}

impl Indexer for SkipList {
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
    // writers are serialised by the engine lock, so get-then-insert is atomic
    let old = self.skl.get(key.as_slice()).map(|entry| *entry.value());
    self.skl.insert(key, pos);
    old
  }

  fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
    self.skl.get(key).map(|entry| *entry.value())
  }

  fn delete(&self, key: &[u8]) -> Option<LogRecordPos> {
    self.skl.remove(key).map(|entry| *entry.value())
  }

  fn list_keys(&self) -> Vec<Bytes> {
    self
      .skl
      .iter()
      .map(|entry| Bytes::copy_from_slice(entry.key()))
      .collect()
  }

  fn entries(&self) -> Vec<(Vec<u8>, LogRecordPos)> {
    self
      .skl
      .iter()
      .map(|entry| (entry.key().clone(), *entry.value()))
      .collect()
  }

  fn len(&self) -> usize {
    self.skl.len()
  }
}
