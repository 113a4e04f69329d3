use std::{
  collections::HashMap,
  fs::{self, File, OpenOptions},
  path::Path,
  sync::Arc,
  time::Duration,
};

use bytes::Bytes;
use fs2::FileExt;
use log::{error, info, warn};
use parking_lot::{
  MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::{
  data::{
    data_file::{list_data_file_ids, DataFile, ScanEnd},
    log_record::{LogRecord, LogRecordPos, LogRecordType},
  },
  errors::{Errors, Result},
  hint,
  index::{new_indexer, Indexer},
  merge,
  option::{IOManagerType, Options},
  sweeper::Sweeper,
  util,
};

pub const FILE_LOCK_NAME: &str = "flock";

/// A handle on an open store.
///
/// Background sweeps (rotation, compaction and the optional periodic fsync)
/// run for as long as the engine is open in writable mode. Dropping the
/// engine shuts it down.
pub struct Engine {
  inner: Arc<Barrel>,
  sweeper: Mutex<Option<Sweeper>>,
}

/// The store shared between the engine handle and its sweeps.
pub(crate) struct Barrel {
  pub(crate) options: Options,
  /// `None` once shut down.
  state: RwLock<Option<BarrelState>>,
}

pub(crate) struct BarrelState {
  pub(crate) active_file: DataFile,
  pub(crate) stale_files: HashMap<u32, DataFile>,
  pub(crate) index: Box<dyn Indexer>,
  /// Bytes taken by superseded records and tombstones, per data file.
  pub(crate) dead_bytes: HashMap<u32, u64>,
  /// Bytes appended since the active file was last synced.
  unsynced_bytes: usize,
  file_lock: Option<File>,
}

/// Point-in-time figures about an open engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
  /// Keys in the keydir, expired ones not yet swept included.
  pub key_num: usize,
  pub data_file_num: usize,
  /// Bytes a merge could give back.
  pub reclaimable_size: u64,
  pub disk_size: u64,
}

impl Engine {
  /// Opens the store in `opts.dir_path`, recovering the keydir from the
  /// hints snapshot and the data files.
  pub fn open(opts: Options) -> Result<Self> {
    opts.check()?;

    let dir_path = opts.dir_path.clone();
    if !dir_path.is_dir() {
      if opts.read_only {
        return Err(Errors::DataDirectoryEmpty);
      }
      if let Err(e) = fs::create_dir_all(&dir_path) {
        error!("failed to create database directory error: {}", e);
        return Err(Errors::FailedToCreateDatabaseDir);
      }
    }

    let file_lock = lock_dir(&dir_path, opts.read_only)?;

    if merge::merge_pending(&dir_path) {
      if opts.read_only {
        return Err(Errors::MergeInProgress);
      }
      info!("completing an interrupted merge in {}", dir_path.display());
    }
    if !opts.read_only {
      merge::load_merge_files(&dir_path)?;
    }

    let state = recover(&opts, file_lock)?;
    info!(
      "opened {} with {} keys in {} data files, active file {}",
      dir_path.display(),
      state.index.len(),
      state.stale_files.len() + 1,
      state.active_file.get_file_id()
    );

    let inner = Arc::new(Barrel {
      options: opts,
      state: RwLock::new(Some(state)),
    });
    let sweeper = if inner.options.read_only {
      None
    } else {
      Some(Sweeper::start(inner.clone()))
    };

    Ok(Engine {
      inner,
      sweeper: Mutex::new(sweeper),
    })
  }

  pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
    self.inner.put(&key, &value, None)
  }

  /// Stores a value that reads as absent once `ttl` has elapsed.
  pub fn put_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) -> Result<()> {
    self.inner.put(&key, &value, Some(ttl))
  }

  pub fn get(&self, key: Bytes) -> Result<Bytes> {
    self.inner.get(&key)
  }

  /// Deletes a key. Deleting an absent key succeeds without writing.
  pub fn delete(&self, key: Bytes) -> Result<()> {
    self.inner.delete(&key)
  }

  /// Live keys in ascending byte order.
  pub fn list(&self) -> Result<Vec<Bytes>> {
    self.inner.list()
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.inner.read_state()?.index.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  #[cfg(test)]
  pub(crate) fn keydir_entries(&self) -> Result<Vec<(Vec<u8>, LogRecordPos)>> {
    Ok(self.inner.read_state()?.index.entries())
  }

  /// Flushes the active file to disk.
  pub fn sync(&self) -> Result<()> {
    self.inner.sync()
  }

  pub fn stat(&self) -> Result<Stat> {
    let state = self.inner.read_state()?;
    Ok(Stat {
      key_num: state.index.len(),
      data_file_num: state.stale_files.len() + 1,
      reclaimable_size: state.dead_bytes.values().sum(),
      disk_size: util::file::dir_disk_size(&self.inner.options.dir_path),
    })
  }

  /// Runs the rotation sweep now. Returns whether the active file was retired.
  pub fn rotate(&self) -> Result<bool> {
    self.inner.rotate()
  }

  /// Runs the compaction sweep now.
  pub fn compact(&self) -> Result<()> {
    self.inner.compact()
  }

  /// Rewrites the live records of every stale file into a single file.
  pub fn merge(&self) -> Result<()> {
    self.inner.merge()
  }

  /// Stops the sweeps, syncs the active file and releases the directory.
  /// Calling it again is a no-op, every other call fails with `EngineClosed`.
  pub fn shutdown(&self) -> Result<()> {
    if let Some(sweeper) = self.sweeper.lock().take() {
      sweeper.stop();
    }
    self.inner.close()
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    if let Err(e) = self.shutdown() {
      error!("error whilst shutting down engine: {}", e);
    }
  }
}

impl Barrel {
  pub(crate) fn read_state(&self) -> Result<MappedRwLockReadGuard<'_, BarrelState>> {
    RwLockReadGuard::try_map(self.state.read(), |state| state.as_ref())
      .map_err(|_| Errors::EngineClosed)
  }

  pub(crate) fn write_state(&self) -> Result<MappedRwLockWriteGuard<'_, BarrelState>> {
    RwLockWriteGuard::try_map(self.state.write(), |state| state.as_mut())
      .map_err(|_| Errors::EngineClosed)
  }

  pub(crate) fn check_writable(&self) -> Result<()> {
    if self.options.read_only {
      return Err(Errors::ReadOnly);
    }
    Ok(())
  }

  fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<()> {
    self.check_writable()?;
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let mut state = self.write_state()?;
    let now = util::time::now_millis();
    let expires_at = ttl.map(|ttl| util::time::expires_at(now, ttl));
    let record = LogRecord::normal(key.to_vec(), value.to_vec(), now, expires_at);
    let pos = self.append_log_record(&mut state, &record)?;

    // the keydir only learns about a record once it is on disk
    if let Some(old_pos) = state.index.put(record.key, pos) {
      state.add_dead_bytes(old_pos.file_id, old_pos.size as u64);
    }
    Ok(())
  }

  fn get(&self, key: &[u8]) -> Result<Bytes> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let state = self.read_state()?;
    let pos = state.index.get(key).ok_or(Errors::KeyNotFound)?;
    if pos.is_expired(util::time::now_millis()) {
      return Err(Errors::KeyNotFound);
    }

    let record = state.read_log_record(&pos)?;
    if record.rec_type == LogRecordType::Deleted || record.key != key {
      error!(
        "keydir entry of file {} offset {} does not hold the value of its key",
        pos.file_id, pos.offset
      );
      return Err(Errors::DataDirectoryCorrupted);
    }
    Ok(record.value.into())
  }

  fn delete(&self, key: &[u8]) -> Result<()> {
    self.check_writable()?;
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let mut state = self.write_state()?;
    self.delete_locked(&mut state, key, util::time::now_millis())
  }

  /// Appends a tombstone for `key` and drops it from the keydir.
  pub(crate) fn delete_locked(&self, state: &mut BarrelState, key: &[u8], now: u64) -> Result<()> {
    let Some(old_pos) = state.index.get(key) else {
      return Ok(());
    };

    let tombstone = LogRecord::tombstone(key.to_vec(), now);
    let pos = self.append_log_record(state, &tombstone)?;
    state.index.delete(key);
    state.add_dead_bytes(old_pos.file_id, old_pos.size as u64);
    state.add_dead_bytes(pos.file_id, pos.size as u64);
    Ok(())
  }

  fn list(&self) -> Result<Vec<Bytes>> {
    let state = self.read_state()?;
    let now = util::time::now_millis();
    Ok(
      state
        .index
        .entries()
        .into_iter()
        .filter(|(_, pos)| !pos.is_expired(now))
        .map(|(key, _)| Bytes::from(key))
        .collect(),
    )
  }

  pub(crate) fn sync(&self) -> Result<()> {
    let mut state = self.write_state()?;
    state.active_file.sync()?;
    state.unsynced_bytes = 0;
    Ok(())
  }

  /// Appends to the active file, syncing as the options ask.
  pub(crate) fn append_log_record(
    &self,
    state: &mut BarrelState,
    record: &LogRecord,
  ) -> Result<LogRecordPos> {
    let enc_record = record.encode();
    let offset = state.active_file.append(&enc_record)?;

    state.unsynced_bytes += enc_record.len();
    let need_sync = self.options.sync_writes
      || (self.options.bytes_per_sync > 0 && state.unsynced_bytes >= self.options.bytes_per_sync);
    if need_sync {
      state.active_file.sync()?;
      state.unsynced_bytes = 0;
    }

    Ok(LogRecordPos {
      file_id: state.active_file.get_file_id(),
      offset,
      size: enc_record.len() as u32,
      created_at: record.created_at,
      expires_at: record.expires_at,
    })
  }

  fn close(&self) -> Result<()> {
    let mut write_guard = self.state.write();
    let Some(state) = write_guard.take() else {
      return Ok(());
    };

    let sync_res = state.active_file.sync();
    if let Some(file_lock) = &state.file_lock {
      if let Err(e) = FileExt::unlock(file_lock) {
        error!("failed to unlock the database directory: {}", e);
      }
    }
    info!("closed {}", self.options.dir_path.display());
    sync_res
  }
}

impl BarrelState {
  pub(crate) fn data_file(&self, file_id: u32) -> Result<&DataFile> {
    if file_id == self.active_file.get_file_id() {
      return Ok(&self.active_file);
    }
    self.stale_files.get(&file_id).ok_or(Errors::DataFileNotFound)
  }

  pub(crate) fn read_log_record(&self, pos: &LogRecordPos) -> Result<LogRecord> {
    let read = self.data_file(pos.file_id)?.read_log_record(pos.offset)?;
    Ok(read.record)
  }

  pub(crate) fn add_dead_bytes(&mut self, file_id: u32, size: u64) {
    *self.dead_bytes.entry(file_id).or_default() += size;
  }
}

fn lock_dir(dir_path: &Path, read_only: bool) -> Result<Option<File>> {
  let lock_path = dir_path.join(FILE_LOCK_NAME);
  if read_only && !lock_path.is_file() {
    return Ok(None);
  }

  let file_lock = match OpenOptions::new()
    .read(true)
    .write(!read_only)
    .create(!read_only)
    .open(&lock_path)
  {
    Ok(file) => file,
    Err(e) => {
      error!("failed to open the lock file: {}", e);
      return Err(Errors::FailedToOpenDataFile);
    }
  };

  let locked = if read_only {
    FileExt::try_lock_shared(&file_lock)
  } else {
    FileExt::try_lock_exclusive(&file_lock)
  };
  if locked.is_err() {
    return Err(Errors::DatabaseIsUsing);
  }
  Ok(Some(file_lock))
}

/// Rebuilds the keydir from the hints snapshot and the data files newer
/// than it, then opens the active and stale files.
fn recover(options: &Options, file_lock: Option<File>) -> Result<BarrelState> {
  let dir_path = &options.dir_path;
  let file_ids = list_data_file_ids(dir_path)?;
  if file_ids.is_empty() && options.read_only {
    return Err(Errors::DataDirectoryEmpty);
  }

  let index = new_indexer(options.index_type);
  let replay_from = load_hints_into(dir_path, &file_ids, index.as_ref());

  let scan_io_type = if options.mmap_at_startup {
    IOManagerType::MemoryMap
  } else {
    IOManagerType::StandardFileIO
  };
  let mut active_id = file_ids.last().copied();
  let mut torn_tail = None;
  let mut seal_active = false;
  for &file_id in file_ids.iter().filter(|&&id| id >= replay_from) {
    let data_file = DataFile::open_for_read(dir_path, file_id, scan_io_type)?;
    let end = replay_data_file(&data_file, index.as_ref());
    drop(data_file);

    if Some(file_id) != active_id || options.read_only {
      continue;
    }
    match end {
      Some(ScanEnd::TornTail(offset)) => torn_tail = Some(offset),
      // new records never follow bytes a scan can not get past
      Some(ScanEnd::Unreadable(_)) => seal_active = true,
      _ => {}
    }
  }

  let mut stale_files = HashMap::new();
  if seal_active {
    if let Some(sealed_id) = active_id {
      let next_id = sealed_id
        .checked_add(1)
        .ok_or(Errors::DataDirectoryCorrupted)?;
      warn!(
        "data file {} is damaged, continuing in data file {}",
        sealed_id, next_id
      );
      active_id = Some(next_id);
    }
  }

  let mut active_file = match active_id {
    Some(active_id) => {
      for &file_id in file_ids.iter().filter(|&&id| id != active_id) {
        let data_file = DataFile::open_for_read(dir_path, file_id, IOManagerType::StandardFileIO)?;
        stale_files.insert(file_id, data_file);
      }
      if options.read_only {
        DataFile::open_for_read(dir_path, active_id, IOManagerType::StandardFileIO)?
      } else {
        DataFile::new(dir_path, active_id, IOManagerType::StandardFileIO)?
      }
    }
    None => DataFile::new(dir_path, 0, IOManagerType::StandardFileIO)?,
  };

  if let Some(offset) = torn_tail {
    warn!(
      "truncating torn tail of data file {} at offset {}",
      active_file.get_file_id(),
      offset
    );
    active_file.truncate(offset)?;
    active_file.sync()?;
  }

  let dropped = drop_unbacked_entries(index.as_ref(), &active_file, &stale_files);
  if dropped > 0 {
    warn!(
      "dropped {} keys whose records are missing from the data files",
      dropped
    );
    if !options.read_only {
      hint::remove_hints(dir_path)?;
    }
  }

  // everything in a file that the keydir does not point at is dead
  let mut live_bytes: HashMap<u32, u64> = HashMap::new();
  for (_, pos) in index.entries() {
    *live_bytes.entry(pos.file_id).or_default() += pos.size as u64;
  }
  let mut dead_bytes = HashMap::new();
  for data_file in stale_files.values().chain(std::iter::once(&active_file)) {
    let file_id = data_file.get_file_id();
    let live = live_bytes.get(&file_id).copied().unwrap_or_default();
    dead_bytes.insert(file_id, data_file.size().saturating_sub(live));
  }

  Ok(BarrelState {
    active_file,
    stale_files,
    index,
    dead_bytes,
    unsynced_bytes: 0,
    file_lock,
  })
}

/// Seeds `index` from the hints snapshot. Returns the first data file id that
/// still has to be replayed.
fn load_hints_into(dir_path: &Path, file_ids: &[u32], index: &dyn Indexer) -> u32 {
  let entries = match hint::load_hints(dir_path) {
    Ok(Some(entries)) => entries,
    Ok(None) => return 0,
    Err(e) => {
      warn!("ignoring hint file: {}", e);
      return 0;
    }
  };

  if let Some((_, pos)) = entries
    .iter()
    .find(|(_, pos)| file_ids.binary_search(&pos.file_id).is_err())
  {
    warn!(
      "ignoring hint file referencing missing data file {}",
      pos.file_id
    );
    return 0;
  }

  let mut max_file_id = None;
  for (key, pos) in entries {
    max_file_id = max_file_id.max(Some(pos.file_id));
    index.put(key, pos);
  }
  max_file_id.unwrap_or_default()
}

/// Applies every readable record of `data_file` to `index` and reports how
/// the scan ended.
fn replay_data_file(data_file: &DataFile, index: &dyn Indexer) -> Option<ScanEnd> {
  let file_id = data_file.get_file_id();
  let mut scan = data_file.scan();
  for (offset, res) in scan.by_ref() {
    let read = match res {
      Ok(read) => read,
      Err(e) => {
        warn!(
          "skipping record in file {} at offset {}: {}",
          file_id, offset, e
        );
        continue;
      }
    };

    let record = read.record;
    match record.rec_type {
      LogRecordType::Normal => {
        let pos = LogRecordPos {
          file_id,
          offset,
          size: read.size as u32,
          created_at: record.created_at,
          expires_at: record.expires_at,
        };
        index.put(record.key, pos);
      }
      LogRecordType::Deleted => {
        index.delete(&record.key);
      }
    }
  }

  let end = scan.end();
  if let Some(ScanEnd::Unreadable(offset)) = end {
    warn!(
      "data file {} is unreadable from offset {}",
      file_id, offset
    );
  }
  end
}

/// Removes keydir entries pointing past the end of their data file, as a
/// hints snapshot can after the tail of a file was lost. Returns how many.
fn drop_unbacked_entries(
  index: &dyn Indexer,
  active_file: &DataFile,
  stale_files: &HashMap<u32, DataFile>,
) -> usize {
  let mut dropped = 0;
  for (key, pos) in index.entries() {
    let file_size = if pos.file_id == active_file.get_file_id() {
      Some(active_file.size())
    } else {
      stale_files.get(&pos.file_id).map(|f| f.size())
    };
    let backed = file_size.is_some_and(|size| pos.offset + pos.size as u64 <= size);
    if !backed {
      index.delete(&key);
      dropped += 1;
    }
  }
  dropped
}

