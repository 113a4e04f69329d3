use std::{
  fs::{File, OpenOptions},
  io::{ErrorKind, Write},
  os::unix::fs::FileExt,
  path::Path,
  sync::Arc,
};

use log::error;
use parking_lot::RwLock;

use crate::errors::{Errors, Result};

use super::IOManager;

/// Standard file I/O: positional reads, appending writes.
pub struct FileIO {
  fd: Arc<RwLock<File>>,
  writable: bool,
}

impl FileIO {
  pub fn new<P>(file_name: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    match OpenOptions::new()
      .create(true)
      .read(true)
      .append(true)
      .open(file_name)
    {
      Ok(file) => Ok(FileIO {
        fd: Arc::new(RwLock::new(file)),
        writable: true,
      }),
      Err(e) => {
        error!("failed to open data file error: {}", e);
        Err(Errors::FailedToOpenDataFile)
      }
    }
  }

  pub fn open_read_only<P>(file_name: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    match OpenOptions::new().read(true).open(file_name) {
      Ok(file) => Ok(FileIO {
        fd: Arc::new(RwLock::new(file)),
        writable: false,
      }),
      Err(e) => {
        error!("failed to open data file error: {}", e);
        Err(Errors::FailedToOpenDataFile)
      }
    }
  }
}

impl IOManager for FileIO {
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    let read_guard = self.fd.read();
    match read_guard.read_exact_at(buf, offset) {
      Ok(()) => Ok(buf.len()),
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(Errors::ReadDataFileEOF),
      Err(e) => {
        error!("read from data file error: {}", e);
        Err(Errors::FailedToReadFromDataFile)
      }
    }
  }

  fn write(&self, buf: &[u8]) -> Result<usize> {
    if !self.writable {
      return Err(Errors::ReadOnly);
    }
    let mut write_guard = self.fd.write();
    match write_guard.write_all(buf) {
      Ok(()) => Ok(buf.len()),
      Err(e) => {
        error!("write to data file error: {}", e);
        Err(Errors::FailedToWriteToDataFile)
      }
    }
  }

  fn sync(&self) -> Result<()> {
    if !self.writable {
      return Ok(());
    }
    let read_guard = self.fd.read();
    if let Err(e) = read_guard.sync_all() {
      error!("failed to sync data file: {}", e);
      return Err(Errors::FailedToSyncDataFile);
    }
    Ok(())
  }

  fn truncate(&self, len: u64) -> Result<()> {
    if !self.writable {
      return Err(Errors::ReadOnly);
    }
    let write_guard = self.fd.write();
    if let Err(e) = write_guard.set_len(len) {
      error!("failed to truncate data file: {}", e);
      return Err(Errors::FailedToWriteToDataFile);
    }
    Ok(())
  }

  fn size(&self) -> u64 {
    let read_guard = self.fd.read();
    match read_guard.metadata() {
      Ok(metadata) => metadata.len(),
      Err(e) => {
        error!("failed to stat data file: {}", e);
        0
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_file_io_write() {
    let dir = tempfile::tempdir().unwrap();
    let fio = FileIO::new(dir.path().join("a.data")).unwrap();

    assert_eq!(fio.write("key-a".as_bytes()), Ok(5));
    assert_eq!(fio.write("key-bc".as_bytes()), Ok(6));
    assert_eq!(fio.size(), 11);
  }

  #[test]
  fn test_file_io_read() {
    let dir = tempfile::tempdir().unwrap();
    let fio = FileIO::new(dir.path().join("a.data")).unwrap();
    fio.write("key-a".as_bytes()).unwrap();
    fio.write("key-b".as_bytes()).unwrap();

    let mut buf = [0u8; 5];
    assert_eq!(fio.read(&mut buf, 0), Ok(5));
    assert_eq!(&buf, b"key-a");
    assert_eq!(fio.read(&mut buf, 5), Ok(5));
    assert_eq!(&buf, b"key-b");

    assert_eq!(fio.read(&mut buf, 8), Err(Errors::ReadDataFileEOF));
  }

  #[test]
  fn test_file_io_sync() {
    let dir = tempfile::tempdir().unwrap();
    let fio = FileIO::new(dir.path().join("a.data")).unwrap();
    fio.write("key-a".as_bytes()).unwrap();
    assert!(fio.sync().is_ok());
  }

  #[test]
  fn test_file_io_truncate() {
    let dir = tempfile::tempdir().unwrap();
    let fio = FileIO::new(dir.path().join("a.data")).unwrap();
    fio.write(b"key-a").unwrap();
    fio.write(b"garbage").unwrap();

    fio.truncate(5).unwrap();
    assert_eq!(fio.size(), 5);

    // appends continue at the new end
    fio.write(b"key-b").unwrap();
    let mut buf = [0u8; 10];
    fio.read(&mut buf, 0).unwrap();
    assert_eq!(&buf, b"key-akey-b");
  }

  #[test]
  fn test_file_io_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.data");
    assert_eq!(
      FileIO::open_read_only(&path).err(),
      Some(Errors::FailedToOpenDataFile)
    );

    FileIO::new(&path).unwrap().write(b"hello").unwrap();
    let fio = FileIO::open_read_only(&path).unwrap();
    assert_eq!(fio.write(b"world"), Err(Errors::ReadOnly));
    assert_eq!(fio.truncate(0), Err(Errors::ReadOnly));

    let mut buf = [0u8; 5];
    fio.read(&mut buf, 0).unwrap();
    assert_eq!(&buf, b"hello");
  }
}
