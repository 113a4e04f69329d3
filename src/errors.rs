use std::result;

use thiserror::Error;

/// Coarse classification of [`Errors`], so callers can tell a missing key
/// from a damaged store without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Io,
  Corruption,
  NotFound,
  ReadOnly,
  Invalid,
  Closed,
}

#[derive(Error, Debug, PartialEq)]
pub enum Errors {
  #[error("failed to read from data file")]
  FailedToReadFromDataFile,

  #[error("failed to write to data file")]
  FailedToWriteToDataFile,

  #[error("failed to sync data file")]
  FailedToSyncDataFile,

  #[error("failed to open data file")]
  FailedToOpenDataFile,

  #[error("failed to create the database directory")]
  FailedToCreateDatabaseDir,

  #[error("failed to read the database directory")]
  FailedToReadDatabaseDir,

  #[error("failed to rename file")]
  FailedToRenameFile,

  #[error("failed to remove file")]
  FailedToRemoveFile,

  #[error("read data file eof")]
  ReadDataFileEOF,

  #[error("data file is not found in database")]
  DataFileNotFound,

  #[error("not enough disk space for merge")]
  MergeNoEnoughSpace,

  #[error("invalid crc value, log record maybe corrupted")]
  InvalidLogRecordCrc,

  #[error("malformed log record header")]
  MalformedLogRecordHeader,

  #[error("log record is truncated")]
  TruncatedLogRecord,

  #[error("hint file is corrupted")]
  HintFileCorrupted,

  #[error("the database directory maybe corrupted")]
  DataDirectoryCorrupted,

  #[error("key is not found in database")]
  KeyNotFound,

  #[error("the database was opened read-only")]
  ReadOnly,

  #[error("the key is empty")]
  KeyIsEmpty,

  #[error("database dir path can not be empty")]
  DirPathIsEmpty,

  #[error("max active file size must be greater than 0")]
  DataFileSizeTooSmall,

  #[error("invalid merge ratio, must be between 0 and 1")]
  InvalidMergeRatio,

  #[error("sweep interval must be greater than 0")]
  InvalidSweepInterval,

  #[error("the database directory is used by another process")]
  DatabaseIsUsing,

  #[error("no data files found in database directory")]
  DataDirectoryEmpty,

  #[error("merge is in progress, try again later")]
  MergeInProgress,

  #[error("the merge ratio do not reach the option")]
  MergeThresholdUnreached,

  #[error("the engine has been shut down")]
  EngineClosed,
}

impl Errors {
  pub fn kind(&self) -> ErrorKind {
    use Errors::*;
    match self {
      FailedToReadFromDataFile
      | FailedToWriteToDataFile
      | FailedToSyncDataFile
      | FailedToOpenDataFile
      | FailedToCreateDatabaseDir
      | FailedToReadDatabaseDir
      | FailedToRenameFile
      | FailedToRemoveFile
      | ReadDataFileEOF
      | DataFileNotFound
      | MergeNoEnoughSpace => ErrorKind::Io,
      InvalidLogRecordCrc
      | MalformedLogRecordHeader
      | TruncatedLogRecord
      | HintFileCorrupted
      | DataDirectoryCorrupted => ErrorKind::Corruption,
      KeyNotFound => ErrorKind::NotFound,
      ReadOnly => ErrorKind::ReadOnly,
      KeyIsEmpty
      | DirPathIsEmpty
      | DataFileSizeTooSmall
      | InvalidMergeRatio
      | InvalidSweepInterval
      | DatabaseIsUsing
      | DataDirectoryEmpty
      | MergeInProgress
      | MergeThresholdUnreached => ErrorKind::Invalid,
      EngineClosed => ErrorKind::Closed,
    }
  }

  pub fn is_corruption(&self) -> bool {
    self.kind() == ErrorKind::Corruption
  }

  pub fn is_not_found(&self) -> bool {
    self.kind() == ErrorKind::NotFound
  }
}

pub type Result<T> = result::Result<T, Errors>;
