use std::{fs, path::Path};

use log::{error, info, warn};

use crate::{
  data::{
    data_file::{
      get_data_file_name, list_data_file_ids, DataFile, MERGE_FILE_NAME, MERGE_FINISHED_FILE_NAME,
    },
    log_record::{LogRecord, LogRecordPos},
  },
  db::{Barrel, BarrelState},
  errors::{Errors, Result},
  hint::{self, remove_if_exists},
  option::IOManagerType,
  util,
};

const MERGE_FIN_KEY: &[u8] = "merge.finished".as_bytes();

impl Barrel {
  pub(crate) fn merge(&self) -> Result<()> {
    self.check_writable()?;
    let mut state = self.write_state()?;
    self.merge_locked(&mut state)
  }

  /// Rewrites the live records of all stale files into one file that takes
  /// the id of the newest stale file, then deletes the others.
  ///
  /// The `merge-finished` marker is the commit point: a crash before it
  /// leaves the stale files untouched, a crash after it is finished by
  /// [`load_merge_files`] on the next open.
  pub(crate) fn merge_locked(&self, state: &mut BarrelState) -> Result<()> {
    let Some(merge_file_id) = state.stale_files.keys().max().copied() else {
      return Err(Errors::MergeThresholdUnreached);
    };

    let total_size: u64 = state.stale_files.values().map(|f| f.size()).sum();
    let dead_size: u64 = state
      .stale_files
      .keys()
      .filter_map(|file_id| state.dead_bytes.get(file_id))
      .sum();
    if total_size == 0 || (dead_size as f32 / total_size as f32) < self.options.file_merge_threshold
    {
      return Err(Errors::MergeThresholdUnreached);
    }

    let dir_path = &self.options.dir_path;
    let live_size = total_size.saturating_sub(dead_size);
    if live_size >= util::file::available_disk_space(dir_path) {
      return Err(Errors::MergeNoEnoughSpace);
    }

    info!(
      "merging {} stale files into {} ({} of {} bytes are dead)",
      state.stale_files.len(),
      merge_file_id,
      dead_size,
      total_size
    );

    remove_if_exists(dir_path.join(MERGE_FILE_NAME))?;
    let mut merge_file = DataFile::new_merge_file(dir_path, merge_file_id)?;
    let now = util::time::now_millis();
    let active_file_id = state.active_file.get_file_id();

    let mut moved = Vec::new();
    let mut expired = Vec::new();
    for (key, pos) in state.index.entries() {
      if pos.file_id == active_file_id {
        continue;
      }
      if pos.is_expired(now) {
        expired.push(key);
        continue;
      }

      let record = state.read_log_record(&pos)?;
      let offset = merge_file.append(&record.encode())?;
      moved.push((
        key,
        LogRecordPos {
          file_id: merge_file_id,
          offset,
          ..pos
        },
      ));
    }
    merge_file.sync()?;
    let merged_size = merge_file.size();
    drop(merge_file);

    // positions in the snapshot are about to go stale
    hint::remove_hints(dir_path)?;
    write_merge_finished(dir_path, merge_file_id, now)?;

    // open handles keep replaced files readable until they are swapped below
    finish_merge(dir_path, merge_file_id)?;
    let merged_file = DataFile::open_for_read(dir_path, merge_file_id, IOManagerType::StandardFileIO)?;

    for (key, pos) in moved {
      state.index.put(key, pos);
    }
    for key in expired {
      state.index.delete(&key);
    }

    let stale_ids: Vec<u32> = state.stale_files.keys().copied().collect();
    for file_id in stale_ids {
      state.dead_bytes.remove(&file_id);
    }
    state.stale_files.clear();
    state.stale_files.insert(merge_file_id, merged_file);
    state.dead_bytes.insert(merge_file_id, 0);

    info!(
      "merge finished, {} bytes of stale data left",
      merged_size
    );
    Ok(())
  }
}

/// Whether a committed merge is waiting to be finished.
pub(crate) fn merge_pending<P>(dir_path: P) -> bool
where
  P: AsRef<Path>,
{
  dir_path.as_ref().join(MERGE_FINISHED_FILE_NAME).is_file()
}

/// Brings the directory to a consistent state after an interrupted merge:
/// a committed merge is finished, an uncommitted one is discarded.
pub(crate) fn load_merge_files<P>(dir_path: P) -> Result<()>
where
  P: AsRef<Path>,
{
  let dir_path = dir_path.as_ref();
  if !merge_pending(dir_path) {
    return remove_if_exists(dir_path.join(MERGE_FILE_NAME));
  }

  let merge_file_id = match read_merge_finished(dir_path) {
    Ok(merge_file_id) => merge_file_id,
    Err(e) => {
      // the marker never made it to disk, so the merge did not commit
      warn!("discarding merge with unreadable marker: {}", e);
      remove_if_exists(dir_path.join(MERGE_FILE_NAME))?;
      return remove_if_exists(dir_path.join(MERGE_FINISHED_FILE_NAME));
    }
  };

  hint::remove_hints(dir_path)?;
  finish_merge(dir_path, merge_file_id)
}

fn write_merge_finished(dir_path: &Path, merge_file_id: u32, now: u64) -> Result<()> {
  remove_if_exists(dir_path.join(MERGE_FINISHED_FILE_NAME))?;
  let mut merge_fin_file = DataFile::new_merge_fin_file(dir_path)?;
  let merge_fin_record = LogRecord::normal(
    MERGE_FIN_KEY.to_vec(),
    merge_file_id.to_string().into_bytes(),
    now,
    None,
  );
  merge_fin_file.append(&merge_fin_record.encode())?;
  merge_fin_file.sync()
}

fn read_merge_finished(dir_path: &Path) -> Result<u32> {
  let merge_fin_file = DataFile::new_merge_fin_file(dir_path)?;
  let record = merge_fin_file.read_log_record(0)?.record;
  if record.key != MERGE_FIN_KEY {
    return Err(Errors::DataDirectoryCorrupted);
  }
  String::from_utf8(record.value)
    .ok()
    .and_then(|v| v.parse::<u32>().ok())
    .ok_or(Errors::DataDirectoryCorrupted)
}

/// Moves the merge output over `{merge_file_id}.data`, deletes every older
/// data file and finally the marker. Safe to repeat.
fn finish_merge(dir_path: &Path, merge_file_id: u32) -> Result<()> {
  let merge_path = dir_path.join(MERGE_FILE_NAME);
  if merge_path.is_file() {
    if let Err(e) = fs::rename(&merge_path, get_data_file_name(dir_path, merge_file_id)) {
      error!("failed to move merged data file: {}", e);
      return Err(Errors::FailedToRenameFile);
    }
  }

  for file_id in list_data_file_ids(dir_path)? {
    if file_id < merge_file_id {
      remove_if_exists(get_data_file_name(dir_path, file_id))?;
    }
  }

  remove_if_exists(dir_path.join(MERGE_FINISHED_FILE_NAME))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write_data_file(dir_path: &Path, file_id: u32, keys: &[&str]) {
    let mut data_file = DataFile::new(dir_path, file_id, IOManagerType::StandardFileIO).unwrap();
    for key in keys {
      let record = LogRecord::normal(key.as_bytes().to_vec(), b"value".to_vec(), 1, None);
      data_file.append(&record.encode()).unwrap();
    }
    data_file.sync().unwrap();
  }

  #[test]
  fn test_load_merge_files_without_marker() {
    let dir = tempfile::tempdir().unwrap();
    write_data_file(dir.path(), 0, &["a"]);
    write_data_file(dir.path(), 1, &["b"]);
    fs::write(dir.path().join(MERGE_FILE_NAME), b"half written").unwrap();

    assert!(!merge_pending(dir.path()));
    load_merge_files(dir.path()).unwrap();
    assert!(!dir.path().join(MERGE_FILE_NAME).exists());
    assert_eq!(list_data_file_ids(dir.path()), Ok(vec![0, 1]));
  }

  #[test]
  fn test_load_merge_files_completes_committed_merge() {
    let dir = tempfile::tempdir().unwrap();
    write_data_file(dir.path(), 0, &["a"]);
    write_data_file(dir.path(), 1, &["b"]);
    write_data_file(dir.path(), 2, &["c"]);
    write_data_file(dir.path(), 3, &["active"]);

    let mut merge_file = DataFile::new_merge_file(dir.path(), 2).unwrap();
    let merged = LogRecord::normal(b"merged".to_vec(), b"value".to_vec(), 1, None);
    merge_file.append(&merged.encode()).unwrap();
    merge_file.sync().unwrap();
    drop(merge_file);
    write_merge_finished(dir.path(), 2, 1).unwrap();

    assert!(merge_pending(dir.path()));
    load_merge_files(dir.path()).unwrap();
    assert!(!merge_pending(dir.path()));
    assert!(!dir.path().join(MERGE_FILE_NAME).exists());
    assert_eq!(list_data_file_ids(dir.path()), Ok(vec![2, 3]));

    let data_file = DataFile::open_for_read(dir.path(), 2, IOManagerType::StandardFileIO).unwrap();
    assert_eq!(data_file.read_log_record(0).unwrap().record, merged);

    // finishing twice changes nothing
    write_merge_finished(dir.path(), 2, 1).unwrap();
    load_merge_files(dir.path()).unwrap();
    assert_eq!(list_data_file_ids(dir.path()), Ok(vec![2, 3]));
  }

  #[test]
  fn test_load_merge_files_discards_torn_marker() {
    let dir = tempfile::tempdir().unwrap();
    write_data_file(dir.path(), 0, &["a"]);
    write_data_file(dir.path(), 1, &["b"]);
    fs::write(dir.path().join(MERGE_FILE_NAME), b"merged").unwrap();
    fs::write(dir.path().join(MERGE_FINISHED_FILE_NAME), b"torn").unwrap();

    load_merge_files(dir.path()).unwrap();
    assert!(!merge_pending(dir.path()));
    assert!(!dir.path().join(MERGE_FILE_NAME).exists());
    assert_eq!(list_data_file_ids(dir.path()), Ok(vec![0, 1]));
  }
}
