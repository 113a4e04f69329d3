use derive_more::Display;
use lazy_static::lazy_static;
use std::{path::PathBuf, time::Duration};

use crate::errors::{Errors, Result};

lazy_static! {
  pub static ref DEFAULT_DIR_PATH: PathBuf = std::env::temp_dir().join("barrel-kv");
}

#[derive(Debug, Clone)]
pub struct Options {
  pub dir_path: PathBuf,

  /// Reject every mutation and never touch files on disk.
  pub read_only: bool,

  /// fsync the active file after every append.
  pub sync_writes: bool,

  /// fsync once this many bytes were appended since the last sync, 0 disables.
  pub bytes_per_sync: usize,

  /// Size at which the rotation sweep retires the active file.
  pub max_active_file_size: u64,

  pub index_type: IndexType,

  /// Scan data files through a memory map while recovering.
  pub mmap_at_startup: bool,

  /// Let the compaction sweep merge stale files.
  pub enable_merge: bool,

  /// Minimum ratio of dead bytes to total stale bytes before a merge runs.
  pub file_merge_threshold: f32,

  pub rotation_interval: Duration,

  pub compaction_interval: Duration,

  /// Periodic fsync of the active file, for engines without `sync_writes`.
  pub sync_interval: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum IndexType {
  HashMap,

  BTree,

  SkipList,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      dir_path: DEFAULT_DIR_PATH.clone(),
      read_only: false,
      sync_writes: false,
      bytes_per_sync: 0,
      max_active_file_size: 64 * 1024 * 1024, // 64MB
      index_type: IndexType::HashMap,
      mmap_at_startup: true,
      enable_merge: false,
      file_merge_threshold: 0.5,
      rotation_interval: Duration::from_secs(60),
      compaction_interval: Duration::from_secs(60 * 60),
      sync_interval: None,
    }
  }
}

impl Options {
  pub(crate) fn check(&self) -> Result<()> {
    match self.dir_path.to_str() {
      Some(dir_path) if !dir_path.is_empty() => {}
      _ => return Err(Errors::DirPathIsEmpty),
    }

    if self.max_active_file_size == 0 {
      return Err(Errors::DataFileSizeTooSmall);
    }

    if !(0.0..=1.0).contains(&self.file_merge_threshold) {
      return Err(Errors::InvalidMergeRatio);
    }

    let zero = Duration::ZERO;
    if self.rotation_interval == zero
      || self.compaction_interval == zero
      || self.sync_interval == Some(zero)
    {
      return Err(Errors::InvalidSweepInterval);
    }

    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum IOManagerType {
  StandardFileIO,

  MemoryMap,
}
