use std::path::Path;

use log::error;

/// Total size in bytes of everything under `dir_path`, 0 if it cannot be read.
pub fn dir_disk_size<P>(dir_path: P) -> u64
where
  P: AsRef<Path>,
{
  match fs_extra::dir::get_size(dir_path.as_ref()) {
    Ok(size) => size,
    Err(e) => {
      error!("failed to get dir size: {}", e);
      0
    }
  }
}

/// Free space on the file system holding `dir_path`.
pub fn available_disk_space<P>(dir_path: P) -> u64
where
  P: AsRef<Path>,
{
  match fs2::available_space(dir_path.as_ref()) {
    Ok(size) => size,
    Err(e) => {
      error!("failed to get available disk space: {}", e);
      0
    }
  }
}
