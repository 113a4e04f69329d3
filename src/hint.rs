//! Keydir snapshot kept beside the data files to shorten recovery.
//!
//! The snapshot is a sequence of ordinary records whose key is the logical
//! key and whose value is the encoded [`LogRecordPos`]. It is only a hint:
//! data files newer than the positions it references are replayed on top of
//! it, so a snapshot lagging behind the data files is harmless.

use std::{fs, path::Path};

use log::{error, warn};

use crate::{
  data::{
    data_file::{DataFile, HINT_FILE_NAME, HINT_TEMP_FILE_NAME},
    log_record::{LogRecordPos, LogRecordType},
  },
  errors::{Errors, Result},
};

/// Writes `entries` to a temp file and renames it over the snapshot, so a
/// crash leaves either the previous snapshot or the new one.
pub fn write_hints<P>(dir_path: P, entries: &[(Vec<u8>, LogRecordPos)]) -> Result<()>
where
  P: AsRef<Path>,
{
  let dir_path = dir_path.as_ref();
  let temp_path = dir_path.join(HINT_TEMP_FILE_NAME);
  remove_if_exists(&temp_path)?;

  let mut hint_file = DataFile::new_hint_temp_file(dir_path)?;
  for (key, pos) in entries {
    hint_file.write_hint_record(key.clone(), *pos)?;
  }
  hint_file.sync()?;
  drop(hint_file);

  if let Err(e) = fs::rename(&temp_path, dir_path.join(HINT_FILE_NAME)) {
    error!("failed to rename hint file: {}", e);
    return Err(Errors::FailedToRenameFile);
  }
  Ok(())
}

/// Reads the snapshot back, `None` when there is none.
pub fn load_hints<P>(dir_path: P) -> Result<Option<Vec<(Vec<u8>, LogRecordPos)>>>
where
  P: AsRef<Path>,
{
  let dir_path = dir_path.as_ref();
  if !dir_path.join(HINT_FILE_NAME).is_file() {
    return Ok(None);
  }

  let hint_file = DataFile::new_hint_file(dir_path)?;
  let mut entries = Vec::new();
  for (offset, res) in hint_file.scan() {
    let read = match res {
      Ok(read) => read,
      Err(e) => {
        warn!("hint record at offset {} is unreadable: {}", offset, e);
        return Err(Errors::HintFileCorrupted);
      }
    };
    if read.record.rec_type != LogRecordType::Normal {
      return Err(Errors::HintFileCorrupted);
    }
    let pos = LogRecordPos::decode(&read.record.value)?;
    entries.push((read.record.key, pos));
  }
  Ok(Some(entries))
}

pub fn remove_hints<P>(dir_path: P) -> Result<()>
where
  P: AsRef<Path>,
{
  remove_if_exists(dir_path.as_ref().join(HINT_FILE_NAME))
}

pub(crate) fn remove_if_exists<P>(path: P) -> Result<()>
where
  P: AsRef<Path>,
{
  let path = path.as_ref();
  if !path.is_file() {
    return Ok(());
  }
  if let Err(e) = fs::remove_file(path) {
    error!("failed to remove {}: {}", path.display(), e);
    return Err(Errors::FailedToRemoveFile);
  }
  Ok(())
}
