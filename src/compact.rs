//! Periodic maintenance of the data files: retiring a full active file and
//! sweeping out expired keys.

use log::{debug, error, info, warn};

use crate::{
  data::data_file::DataFile,
  db::{Barrel, BarrelState},
  errors::{Errors, Result},
  hint,
  option::IOManagerType,
  util,
};

impl Barrel {
  /// Retires the active file once it reached `max_active_file_size`.
  /// Returns whether a new active file was started.
  pub(crate) fn rotate(&self) -> Result<bool> {
    self.check_writable()?;
    let mut state = self.write_state()?;
    let size = state.active_file.get_write_off();
    if size < self.options.max_active_file_size {
      debug!(
        "active file {} holds {} bytes, no rotation needed",
        state.active_file.get_file_id(),
        size
      );
      return Ok(false);
    }

    self.rotate_active_file(&mut state)?;
    Ok(true)
  }

  fn rotate_active_file(&self, state: &mut BarrelState) -> Result<()> {
    let dir_path = &self.options.dir_path;
    state.active_file.sync()?;

    let old_file_id = state.active_file.get_file_id();
    let new_file_id = old_file_id
      .checked_add(1)
      .ok_or(Errors::DataDirectoryCorrupted)?;
    let new_active_file = DataFile::new(dir_path, new_file_id, IOManagerType::StandardFileIO)?;
    let stale_file = DataFile::open_for_read(dir_path, old_file_id, IOManagerType::StandardFileIO)?;

    state.active_file = new_active_file;
    state.stale_files.insert(old_file_id, stale_file);
    info!("rotated data file {} to {}", old_file_id, new_file_id);
    Ok(())
  }

  /// Drops expired keys, merges if enabled, then snapshots the keydir.
  pub(crate) fn compact(&self) -> Result<()> {
    self.check_writable()?;
    let mut state = self.write_state()?;

    let expired = self.cleanup_expired(&mut state);
    if expired > 0 {
      info!("compaction removed {} expired keys", expired);
    }

    if self.options.enable_merge {
      match self.merge_locked(&mut state) {
        Ok(()) => {}
        Err(Errors::MergeThresholdUnreached) => debug!("merge threshold not reached"),
        Err(e) => error!("merge failed: {}", e),
      }
    }

    // the snapshot must never point past what is durable
    state.active_file.sync()?;
    hint::write_hints(&self.options.dir_path, &state.index.entries())?;
    debug!("wrote hints for {} keys", state.index.len());
    Ok(())
  }

  /// Tombstones every key whose record has expired, returning how many.
  fn cleanup_expired(&self, state: &mut BarrelState) -> usize {
    let now = util::time::now_millis();
    let mut removed = 0;
    for (key, pos) in state.index.entries() {
      let record = match state.read_log_record(&pos) {
        Ok(record) => record,
        Err(e) => {
          warn!(
            "compaction skips record in file {} at offset {}: {}",
            pos.file_id, pos.offset, e
          );
          continue;
        }
      };
      if !record.is_expired(now) {
        continue;
      }

      match self.delete_locked(state, &key, now) {
        Ok(()) => removed += 1,
        Err(e) => error!("failed to remove expired key: {}", e),
      }
    }
    removed
  }
}
