use std::{
  fs,
  path::{Path, PathBuf},
};

use log::error;

use crate::{
  errors::{Errors, Result},
  fio::{new_io_manager, new_read_only_io_manager, IOManager},
  option::IOManagerType,
};

use super::log_record::{
  declared_record_size, decode_header, max_log_record_header_size, LogRecord, LogRecordHeader,
  LogRecordPos, ReadLogRecord,
};

pub const DATA_FILE_NAME_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const HINT_TEMP_FILE_NAME: &str = "hint-index.tmp";
pub const MERGE_FILE_NAME: &str = "merge.data";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";

/// An append-only log of records, named after its id.
pub struct DataFile {
  file_id: u32,
  /// Offset of the next append.
  write_off: u64,
  io_manager: Box<dyn IOManager>,
}

impl DataFile {
  /// Opens `{file_id}.data` in `dir_path` for appending, creating it if needed.
  pub fn new<P>(dir_path: P, file_id: u32, io_type: IOManagerType) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let file_name = get_data_file_name(&dir_path, file_id);
    Self::from_io_manager(file_id, new_io_manager(file_name, io_type)?)
  }

  /// Opens an existing data file that will only ever be read.
  pub fn open_for_read<P>(dir_path: P, file_id: u32, io_type: IOManagerType) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let file_name = get_data_file_name(&dir_path, file_id);
    Self::from_io_manager(file_id, new_read_only_io_manager(file_name, io_type)?)
  }

  pub fn new_hint_file<P>(dir_path: P) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let file_name = dir_path.as_ref().join(HINT_FILE_NAME);
    Self::from_io_manager(0, new_read_only_io_manager(file_name, IOManagerType::StandardFileIO)?)
  }

  pub fn new_hint_temp_file<P>(dir_path: P) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let file_name = dir_path.as_ref().join(HINT_TEMP_FILE_NAME);
    Self::from_io_manager(0, new_io_manager(file_name, IOManagerType::StandardFileIO)?)
  }

  /// Output of a merge, renamed over the merged data file once complete.
  pub fn new_merge_file<P>(dir_path: P, file_id: u32) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let file_name = dir_path.as_ref().join(MERGE_FILE_NAME);
    Self::from_io_manager(file_id, new_io_manager(file_name, IOManagerType::StandardFileIO)?)
  }

  pub fn new_merge_fin_file<P>(dir_path: P) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let file_name = dir_path.as_ref().join(MERGE_FINISHED_FILE_NAME);
    Self::from_io_manager(0, new_io_manager(file_name, IOManagerType::StandardFileIO)?)
  }

  fn from_io_manager(file_id: u32, io_manager: Box<dyn IOManager>) -> Result<DataFile> {
    Ok(DataFile {
      file_id,
      write_off: io_manager.size(),
      io_manager,
    })
  }

  pub fn get_write_off(&self) -> u64 {
    self.write_off
  }

  pub fn get_file_id(&self) -> u32 {
    self.file_id
  }

  pub fn size(&self) -> u64 {
    self.io_manager.size()
  }

  /// Appends `buf` and returns the offset it was written at.
  pub fn append(&mut self, buf: &[u8]) -> Result<u64> {
    let offset = self.write_off;
    match self.io_manager.write(buf) {
      Ok(n_bytes) => {
        self.write_off += n_bytes as u64;
        Ok(offset)
      }
      Err(e) => {
        // drop whatever part of the record made it to the file
        if let Err(te) = self.io_manager.truncate(offset) {
          error!("failed to cut back a partial append: {}", te);
          self.write_off = self.io_manager.size();
        }
        Err(e)
      }
    }
  }

  pub fn write_hint_record(&mut self, key: Vec<u8>, pos: LogRecordPos) -> Result<()> {
    let hint_record = LogRecord::normal(key, pos.encode(), pos.created_at, None);
    self.append(&hint_record.encode())?;
    Ok(())
  }

  pub fn sync(&self) -> Result<()> {
    self.io_manager.sync()
  }

  pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    self.io_manager.read(&mut buf, offset)?;
    Ok(buf)
  }

  fn read_header_buf(&self, offset: u64) -> Result<Vec<u8>> {
    let file_size = self.size();
    if offset >= file_size {
      return Err(Errors::ReadDataFileEOF);
    }

    let header_len = (max_log_record_header_size() as u64).min(file_size - offset);
    self.read_at(offset, header_len as usize)
  }

  pub fn read_header(&self, offset: u64) -> Result<LogRecordHeader> {
    decode_header(&self.read_header_buf(offset)?)
  }

  /// Length the record at `offset` claims to have, if its size fields can
  /// be read and it ends within the file.
  fn skippable_size(&self, offset: u64) -> Option<u64> {
    let size = self
      .read_header_buf(offset)
      .and_then(|buf| declared_record_size(&buf))
      .ok()? as u64;
    (offset + size <= self.size()).then_some(size)
  }

  /// Reads and verifies the record starting at `offset`.
  pub fn read_log_record(&self, offset: u64) -> Result<ReadLogRecord> {
    let header = self.read_header(offset)?;
    let size = header.record_size();
    if offset + size as u64 > self.size() {
      return Err(Errors::TruncatedLogRecord);
    }

    let buf = self.read_at(offset, size)?;
    let record = LogRecord::decode(&buf)?;
    Ok(ReadLogRecord { record, size })
  }

  /// Iterates every record from the start of the file.
  pub fn scan(&self) -> Scan<'_> {
    Scan {
      data_file: self,
      offset: 0,
      end: None,
    }
  }

  /// Cuts the file back to `len` bytes and moves the write offset there.
  pub fn truncate(&mut self, len: u64) -> Result<()> {
    self.io_manager.truncate(len)?;
    self.write_off = len;
    Ok(())
  }
}

/// How a [`Scan`] finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
  /// Every byte of the file was read.
  Complete,
  /// The last record runs past the end of the file, as left by an
  /// interrupted append. Holds the record's offset.
  TornTail(u64),
  /// The record at this offset can not be parsed far enough to find the
  /// next one.
  Unreadable(u64),
}

/// Sequential reader over a data file.
///
/// A record failing its checksum or carrying an unknown type or flags is
/// reported and skipped using the length its header declares. A record
/// running past the end of the file, or one whose length can not be read,
/// ends the scan; [`Scan::end`] then tells which of the two happened.
pub struct Scan<'a> {
  data_file: &'a DataFile,
  offset: u64,
  end: Option<ScanEnd>,
}

impl Scan<'_> {
  /// `None` while records remain.
  pub fn end(&self) -> Option<ScanEnd> {
    self.end
  }
}

impl Iterator for Scan<'_> {
  type Item = (u64, Result<ReadLogRecord>);

  fn next(&mut self) -> Option<Self::Item> {
    if self.end.is_some() {
      return None;
    }

    let offset = self.offset;
    match self.data_file.read_log_record(offset) {
      Ok(read) => {
        self.offset += read.size as u64;
        Some((offset, Ok(read)))
      }
      Err(Errors::ReadDataFileEOF) => {
        self.end = Some(ScanEnd::Complete);
        None
      }
      Err(Errors::TruncatedLogRecord) => {
        self.end = Some(ScanEnd::TornTail(offset));
        Some((offset, Err(Errors::TruncatedLogRecord)))
      }
      Err(e @ (Errors::InvalidLogRecordCrc | Errors::MalformedLogRecordHeader)) => {
        match self.data_file.skippable_size(offset) {
          Some(size) => self.offset += size,
          None => self.end = Some(ScanEnd::Unreadable(offset)),
        }
        Some((offset, Err(e)))
      }
      Err(e) => {
        self.end = Some(ScanEnd::Unreadable(offset));
        Some((offset, Err(e)))
      }
    }
  }
}

pub fn get_data_file_name<P>(dir_path: P, file_id: u32) -> PathBuf
where
  P: AsRef<Path>,
{
  let name = format!("{:09}", file_id) + DATA_FILE_NAME_SUFFIX;
  dir_path.as_ref().join(name)
}

/// Ids of every data file in `dir_path`, ascending.
pub fn list_data_file_ids<P>(dir_path: P) -> Result<Vec<u32>>
where
  P: AsRef<Path>,
{
  let dir = match fs::read_dir(dir_path.as_ref()) {
    Ok(dir) => dir,
    Err(e) => {
      error!("failed to read database dir: {}", e);
      return Err(Errors::FailedToReadDatabaseDir);
    }
  };

  let mut file_ids = Vec::new();
  for entry in dir.flatten() {
    let file_name = entry.file_name();
    let Some(file_name) = file_name.to_str() else {
      continue;
    };
    if !file_name.ends_with(DATA_FILE_NAME_SUFFIX) || file_name == MERGE_FILE_NAME {
      continue;
    }
    match parse_data_file_id(file_name) {
      Some(file_id) => file_ids.push(file_id),
      None => {
        error!("unexpected data file name {}", file_name);
        return Err(Errors::DataDirectoryCorrupted);
      }
    }
  }
  file_ids.sort_unstable();
  Ok(file_ids)
}

/// "000000042.data" -> Some(42)
pub fn parse_data_file_id(file_name: &str) -> Option<u32> {
  file_name
    .strip_suffix(DATA_FILE_NAME_SUFFIX)
    .and_then(|id| id.parse::<u32>().ok())
}
