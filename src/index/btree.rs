use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::data::log_record::LogRecordPos;

use super::Indexer;

pub struct BTree {
  tree: RwLock<BTreeMap<Vec<u8>, LogRecordPos>>,
}

impl BTree {
  pub fn new() -> Self {
    Self {
      tree: RwLock::new(BTreeMap::new()),
    }
  }
}

impl Default for BTree {
  fn default() -> Self {
    Self::new()
  }
}

impl Indexer for BTree {
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
    let mut write_guard = self.tree.write();
    write_guard.insert(key, pos)
  }

  fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
    let read_guard = self.tree.read();
    read_guard.get(key).copied()
  }

  fn delete(&self, key: &[u8]) -> Option<LogRecordPos> {
    let mut write_guard = self.tree.write();
    write_guard.remove(key)
  }

  fn list_keys(&self) -> Vec<Bytes> {
    let read_guard = self.tree.read();
    read_guard
      .keys()
      .map(|k| Bytes::copy_from_slice(k))
      .collect()
  }

  fn entries(&self) -> Vec<(Vec<u8>, LogRecordPos)> {
    let read_guard = self.tree.read();
    read_guard.iter().map(|(k, v)| (k.clone(), *v)).collect()
  }

  fn len(&self) -> usize {
    self.tree.read().len()
  }
}
