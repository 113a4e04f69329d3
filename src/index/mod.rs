pub mod btree;
pub mod hashmap;
pub mod skiplist;

use bytes::Bytes;

use crate::{data::log_record::LogRecordPos, option::IndexType};

/// The keydir: maps every live key to the location of its newest record.
pub trait Indexer: Sync + Send {
  /// Upserts the position of a key, returning the one it replaced.
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos>;

  fn get(&self, key: &[u8]) -> Option<LogRecordPos>;

  /// Removes a key, a no-op when it is absent.
  fn delete(&self, key: &[u8]) -> Option<LogRecordPos>;

  /// All keys in ascending byte order.
  fn list_keys(&self) -> Vec<Bytes>;

  /// Snapshot of every entry in ascending key order.
  fn entries(&self) -> Vec<(Vec<u8>, LogRecordPos)>;

  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

pub fn new_indexer(index_type: IndexType) -> Box<dyn Indexer> {
  match index_type {
    IndexType::HashMap => Box::new(hashmap::HashMapIndex::new()),
    IndexType::BTree => Box::new(btree::BTree::new()),
    IndexType::SkipList => Box::new(skiplist::SkipList::new()),
  }
}
