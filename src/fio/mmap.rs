use std::{fs::File, path::Path};

use log::error;
use memmap2::Mmap;

use crate::errors::{Errors, Result};

use super::IOManager;

/// Read-only memory-mapped view of a data file, used to speed up the
/// recovery scan. The map is a snapshot of the file at open time.
pub struct MMapIO {
  map: Mmap,
}

impl MMapIO {
  pub fn new<P>(file_name: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    let file = File::open(file_name).map_err(|e| {
      error!("failed to open data file for mapping: {}", e);
      Errors::FailedToOpenDataFile
    })?;

    // SAFETY: data files are append-only, mapped bytes are never rewritten.
    let map = unsafe { Mmap::map(&file) }.map_err(|e| {
      error!("failed to map data file: {}", e);
      Errors::FailedToOpenDataFile
    })?;
    Ok(MMapIO { map })
  }
}

impl IOManager for MMapIO {
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    let start = usize::try_from(offset).map_err(|_| Errors::ReadDataFileEOF)?;
    let src = start
      .checked_add(buf.len())
      .and_then(|end| self.map.get(start..end))
      .ok_or(Errors::ReadDataFileEOF)?;
    buf.copy_from_slice(src);
    Ok(src.len())
  }

  fn write(&self, _buf: &[u8]) -> Result<usize> {
    Err(Errors::ReadOnly)
  }

  fn sync(&self) -> Result<()> {
    Ok(())
  }

  fn truncate(&self, _len: u64) -> Result<()> {
    Err(Errors::ReadOnly)
  }

  fn size(&self) -> u64 {
    self.map.len() as u64
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use super::*;

  #[test]
  fn test_mmap_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("000000001.data");
    assert_eq!(MMapIO::new(&path).err(), Some(Errors::FailedToOpenDataFile));

    fs::write(&path, b"").unwrap();
    let empty = MMapIO::new(&path).unwrap();
    assert_eq!(empty.size(), 0);
    let mut buf = [0u8; 4];
    assert_eq!(empty.read(&mut buf, 0), Err(Errors::ReadDataFileEOF));
  }

  #[test]
  fn test_mmap_read_at() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("000000001.data");
    fs::write(&path, b"barrel-kv stores records").unwrap();

    let mmap_io = MMapIO::new(&path).unwrap();
    assert_eq!(mmap_io.size(), 24);

    let mut buf = [0u8; 9];
    assert_eq!(mmap_io.read(&mut buf, 0), Ok(9));
    assert_eq!(&buf, b"barrel-kv");

    let mut buf = [0u8; 7];
    mmap_io.read(&mut buf, 17).unwrap();
    assert_eq!(&buf, b"records");

    assert_eq!(mmap_io.read(&mut buf, 18), Err(Errors::ReadDataFileEOF));
    assert_eq!(mmap_io.read(&mut buf, u64::MAX), Err(Errors::ReadDataFileEOF));
  }

  #[test]
  fn test_mmap_is_read_only_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("000000001.data");
    fs::write(&path, b"first").unwrap();

    let mmap_io = MMapIO::new(&path).unwrap();
    assert_eq!(mmap_io.write(b"second"), Err(Errors::ReadOnly));
    assert!(mmap_io.sync().is_ok());
    assert_eq!(mmap_io.truncate(0), Err(Errors::ReadOnly));

    fs::write(&path, b"first and more").unwrap();
    assert_eq!(mmap_io.size(), 5);
  }
}
