use bytes::{Buf, BufMut, BytesMut};
use prost::{
  encoding::{decode_varint, encode_varint},
  length_delimiter_len,
};

use crate::errors::{Errors, Result};

pub const CRC_SIZE: usize = 4;

/// crc + type + flags + created_at
const FIXED_HEADER_SIZE: usize = CRC_SIZE + 1 + 1 + 8;

const FLAG_HAS_EXPIRY: u8 = 0b0000_0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
  Normal = 1,

  /// Tombstone, the key was deleted.
  Deleted = 2,
}

impl LogRecordType {
  fn from_u8(v: u8) -> Option<Self> {
    match v {
      1 => Some(LogRecordType::Normal),
      2 => Some(LogRecordType::Deleted),
      _ => None,
    }
  }
}

/// One entry of a data file.
///
/// On disk a record is laid out as
///
/// ```text
/// +---------+------+-------+------------+--------------+----------+------------+-----+-------+
/// | crc u32 | type | flags | created_at | [expires_at] | key_size | value_size | key | value |
/// |   (4)   | (1)  |  (1)  |    (8)     |     (8)      | varint   |  varint    |     |       |
/// +---------+------+-------+------------+--------------+----------+------------+-----+-------+
/// ```
///
/// `expires_at` is only present when bit 0 of `flags` is set. The crc covers
/// every byte after itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
  pub key: Vec<u8>,
  pub value: Vec<u8>,
  pub rec_type: LogRecordType,
  /// Write time, milliseconds since the Unix epoch.
  pub created_at: u64,
  /// Absolute expiry in milliseconds since the Unix epoch.
  pub expires_at: Option<u64>,
}

/// Location of the newest record of a key, as kept in the keydir.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordPos {
  pub file_id: u32,
  /// Start of the encoded record in the file.
  pub offset: u64,
  /// Length of the encoded record.
  pub size: u32,
  pub created_at: u64,
  pub expires_at: Option<u64>,
}

/// A record read from a data file together with its encoded length.
#[derive(Debug)]
pub struct ReadLogRecord {
  pub record: LogRecord,
  pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordHeader {
  pub crc: u32,
  pub rec_type: LogRecordType,
  pub created_at: u64,
  pub expires_at: Option<u64>,
  pub key_size: usize,
  pub value_size: usize,
  pub header_size: usize,
}

impl LogRecordHeader {
  /// Total encoded length declared by this header.
  pub fn record_size(&self) -> usize {
    self.header_size + self.key_size + self.value_size
  }
}

impl LogRecord {
  pub fn normal(key: Vec<u8>, value: Vec<u8>, created_at: u64, expires_at: Option<u64>) -> Self {
    LogRecord {
      key,
      value,
      rec_type: LogRecordType::Normal,
      created_at,
      expires_at,
    }
  }

  pub fn tombstone(key: Vec<u8>, created_at: u64) -> Self {
    LogRecord {
      key,
      value: Vec::new(),
      rec_type: LogRecordType::Deleted,
      created_at,
      expires_at: None,
    }
  }

  pub fn encode(&self) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(self.encoded_length());

    // crc is patched in once the rest is written
    buf.put_u32_le(0);
    buf.put_u8(self.rec_type as u8);
    match self.expires_at {
      Some(expires_at) => {
        buf.put_u8(FLAG_HAS_EXPIRY);
        buf.put_u64_le(self.created_at);
        buf.put_u64_le(expires_at);
      }
      None => {
        buf.put_u8(0);
        buf.put_u64_le(self.created_at);
      }
    }
    encode_varint(self.key.len() as u64, &mut buf);
    encode_varint(self.value.len() as u64, &mut buf);
    buf.extend_from_slice(&self.key);
    buf.extend_from_slice(&self.value);

    let crc = crc32fast::hash(&buf[CRC_SIZE..]);
    buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

    buf.to_vec()
  }

  /// Decodes the record at the start of `buf`, trailing bytes are ignored.
  pub fn decode(buf: &[u8]) -> Result<LogRecord> {
    let header = decode_header(buf)?;
    let size = header.record_size();
    if buf.len() < size {
      return Err(Errors::TruncatedLogRecord);
    }

    let crc = crc32fast::hash(&buf[CRC_SIZE..size]);
    if crc != header.crc {
      return Err(Errors::InvalidLogRecordCrc);
    }

    let key_start = header.header_size;
    let value_start = key_start + header.key_size;
    Ok(LogRecord {
      key: buf[key_start..value_start].to_vec(),
      value: buf[value_start..size].to_vec(),
      rec_type: header.rec_type,
      created_at: header.created_at,
      expires_at: header.expires_at,
    })
  }

  pub fn encoded_length(&self) -> usize {
    let expiry_size = if self.expires_at.is_some() { 8 } else { 0 };
    FIXED_HEADER_SIZE
      + expiry_size
      + length_delimiter_len(self.key.len())
      + length_delimiter_len(self.value.len())
      + self.key.len()
      + self.value.len()
  }

  pub fn is_expired(&self, now: u64) -> bool {
    matches!(self.expires_at, Some(expires_at) if now >= expires_at)
  }
}

/// Parses the header at the start of `buf`.
///
/// Running out of bytes is reported as `TruncatedLogRecord`, anything that
/// can never be a valid header as `MalformedLogRecordHeader`.
pub fn decode_header(buf: &[u8]) -> Result<LogRecordHeader> {
  let layout = decode_layout(buf)?;
  let rec_type = LogRecordType::from_u8(layout.rec_type).ok_or(Errors::MalformedLogRecordHeader)?;
  if layout.flags & !FLAG_HAS_EXPIRY != 0 || layout.key_size == 0 {
    return Err(Errors::MalformedLogRecordHeader);
  }

  Ok(LogRecordHeader {
    crc: layout.crc,
    rec_type,
    created_at: layout.created_at,
    expires_at: layout.expires_at,
    key_size: layout.key_size,
    value_size: layout.value_size,
    header_size: layout.header_size,
  })
}

/// Length of the record at the start of `buf` as its size fields declare
/// it, without validating the type or flags bytes.
pub fn declared_record_size(buf: &[u8]) -> Result<usize> {
  let layout = decode_layout(buf)?;
  Ok(layout.header_size + layout.key_size + layout.value_size)
}

struct RawHeader {
  crc: u32,
  rec_type: u8,
  flags: u8,
  created_at: u64,
  expires_at: Option<u64>,
  key_size: usize,
  value_size: usize,
  header_size: usize,
}

fn decode_layout(buf: &[u8]) -> Result<RawHeader> {
  let mut cursor = buf;
  if cursor.remaining() < FIXED_HEADER_SIZE {
    return Err(Errors::TruncatedLogRecord);
  }

  let crc = cursor.get_u32_le();
  let rec_type = cursor.get_u8();
  let flags = cursor.get_u8();
  let created_at = cursor.get_u64_le();
  let expires_at = if flags & FLAG_HAS_EXPIRY != 0 {
    if cursor.remaining() < 8 {
      return Err(Errors::TruncatedLogRecord);
    }
    Some(cursor.get_u64_le())
  } else {
    None
  };

  let key_size = decode_size(&mut cursor)?;
  let value_size = decode_size(&mut cursor)?;

  Ok(RawHeader {
    crc,
    rec_type,
    flags,
    created_at,
    expires_at,
    key_size,
    value_size,
    header_size: buf.len() - cursor.remaining(),
  })
}

/// Upper bound of an encoded header, used to size the header read.
pub fn max_log_record_header_size() -> usize {
  FIXED_HEADER_SIZE + 8 + length_delimiter_len(u32::MAX as usize) * 2
}

fn decode_size(cursor: &mut &[u8]) -> Result<usize> {
  let max_len = length_delimiter_len(u32::MAX as usize);
  let window = &cursor[..cursor.len().min(max_len)];
  if !window.iter().any(|b| b & 0x80 == 0) {
    return Err(if cursor.len() < max_len {
      Errors::TruncatedLogRecord
    } else {
      Errors::MalformedLogRecordHeader
    });
  }

  let size = decode_varint(cursor).map_err(|_| Errors::MalformedLogRecordHeader)?;
  if size > u32::MAX as u64 {
    return Err(Errors::MalformedLogRecordHeader);
  }
  Ok(size as usize)
}

impl LogRecordPos {
  pub fn encode(&self) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_varint(self.file_id as u64, &mut buf);
    encode_varint(self.offset, &mut buf);
    encode_varint(self.size as u64, &mut buf);
    encode_varint(self.created_at, &mut buf);
    match self.expires_at {
      Some(expires_at) => {
        buf.put_u8(1);
        encode_varint(expires_at, &mut buf);
      }
      None => buf.put_u8(0),
    }
    buf.to_vec()
  }

  pub fn decode(mut buf: &[u8]) -> Result<LogRecordPos> {
    let corrupted = |_| Errors::HintFileCorrupted;
    let file_id = decode_varint(&mut buf).map_err(corrupted)?;
    let offset = decode_varint(&mut buf).map_err(corrupted)?;
    let size = decode_varint(&mut buf).map_err(corrupted)?;
    let created_at = decode_varint(&mut buf).map_err(corrupted)?;
    if !buf.has_remaining() {
      return Err(Errors::HintFileCorrupted);
    }
    let expires_at = match buf.get_u8() {
      0 => None,
      1 => Some(decode_varint(&mut buf).map_err(corrupted)?),
      _ => return Err(Errors::HintFileCorrupted),
    };
    if buf.has_remaining() || file_id > u32::MAX as u64 || size > u32::MAX as u64 {
      return Err(Errors::HintFileCorrupted);
    }

    Ok(LogRecordPos {
      file_id: file_id as u32,
      offset,
      size: size as u32,
      created_at,
      expires_at,
    })
  }

  pub fn is_expired(&self, now: u64) -> bool {
    matches!(self.expires_at, Some(expires_at) if now >= expires_at)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_log_record_encode_and_decode() {
    let rec1 = LogRecord::normal("name".as_bytes().to_vec(), "barrel-kv".as_bytes().to_vec(), 42, None);
    let enc1 = rec1.encode();
    assert_eq!(enc1.len(), rec1.encoded_length());
    assert_eq!(LogRecord::decode(&enc1), Ok(rec1.clone()));
    assert_eq!(decode_header(&enc1).unwrap().record_size(), enc1.len());

    // empty value
    let rec2 = LogRecord::normal("name".as_bytes().to_vec(), Vec::new(), 42, None);
    assert_eq!(LogRecord::decode(&rec2.encode()), Ok(rec2));

    // tombstone
    let rec3 = LogRecord::tombstone("name".as_bytes().to_vec(), 43);
    let dec3 = LogRecord::decode(&rec3.encode()).unwrap();
    assert_eq!(dec3.rec_type, LogRecordType::Deleted);
    assert!(dec3.value.is_empty());

    // expiry is carried in the header
    let rec4 = LogRecord::normal(b"ttl".to_vec(), b"v".to_vec(), 1_000, Some(6_000));
    let enc4 = rec4.encode();
    assert_eq!(enc4.len(), rec1.encode().len() - "name".len() - "barrel-kv".len() + 3 + 1 + 8);
    assert_eq!(LogRecord::decode(&enc4).unwrap().expires_at, Some(6_000));
  }

  #[test]
  fn test_log_record_decode_ignores_trailing_bytes() {
    let rec = LogRecord::normal(b"k".to_vec(), b"v".to_vec(), 7, None);
    let mut enc = rec.encode();
    enc.extend_from_slice(&[0xff; 16]);
    assert_eq!(LogRecord::decode(&enc), Ok(rec));
  }

  #[test]
  fn test_log_record_crc_mismatch() {
    let rec = LogRecord::normal(b"key".to_vec(), b"value".to_vec(), 7, Some(9));
    let mut enc = rec.encode();
    let last = enc.len() - 1;
    enc[last] ^= 0xff;
    assert_eq!(LogRecord::decode(&enc), Err(Errors::InvalidLogRecordCrc));

    // created_at is covered as well
    let mut enc = rec.encode();
    enc[7] ^= 0x01;
    assert_eq!(LogRecord::decode(&enc), Err(Errors::InvalidLogRecordCrc));
  }

  #[test]
  fn test_log_record_truncated() {
    let rec = LogRecord::normal(b"key".to_vec(), b"value".to_vec(), 7, Some(9));
    let enc = rec.encode();

    assert_eq!(LogRecord::decode(&enc[..3]), Err(Errors::TruncatedLogRecord));
    assert_eq!(LogRecord::decode(&enc[..16]), Err(Errors::TruncatedLogRecord));
    assert_eq!(
      LogRecord::decode(&enc[..enc.len() - 1]),
      Err(Errors::TruncatedLogRecord)
    );
    assert_eq!(LogRecord::decode(&[]), Err(Errors::TruncatedLogRecord));
  }

  #[test]
  fn test_log_record_malformed_header() {
    let rec = LogRecord::normal(b"key".to_vec(), b"value".to_vec(), 7, None);

    let mut bad_type = rec.encode();
    bad_type[4] = 9;
    assert_eq!(LogRecord::decode(&bad_type), Err(Errors::MalformedLogRecordHeader));

    let mut bad_flags = rec.encode();
    bad_flags[5] = 0x80;
    assert_eq!(LogRecord::decode(&bad_flags), Err(Errors::MalformedLogRecordHeader));

    // key size varint that never terminates
    let mut bad_size = rec.encode()[..FIXED_HEADER_SIZE].to_vec();
    bad_size.extend_from_slice(&[0xff; 8]);
    assert_eq!(decode_header(&bad_size), Err(Errors::MalformedLogRecordHeader));
  }

  #[test]
  fn test_declared_record_size() {
    let rec = LogRecord::normal(b"key".to_vec(), b"value".to_vec(), 7, Some(9));
    let enc = rec.encode();
    assert_eq!(declared_record_size(&enc), Ok(enc.len()));

    // a damaged type byte still leaves the length readable
    let mut bad_type = enc.clone();
    bad_type[4] ^= 0x04;
    assert_eq!(decode_header(&bad_type), Err(Errors::MalformedLogRecordHeader));
    assert_eq!(declared_record_size(&bad_type), Ok(enc.len()));

    let mut bad_flags = enc.clone();
    bad_flags[5] |= 0x40;
    assert_eq!(decode_header(&bad_flags), Err(Errors::MalformedLogRecordHeader));
    assert_eq!(declared_record_size(&bad_flags), Ok(enc.len()));

    assert_eq!(declared_record_size(&enc[..10]), Err(Errors::TruncatedLogRecord));
  }

  #[test]
  fn test_max_header_size() {
    let rec = LogRecord::normal(vec![1u8; 70_000], vec![2u8; 300_000], u64::MAX, Some(u64::MAX));
    let header = decode_header(&rec.encode()).unwrap();
    assert!(header.header_size <= max_log_record_header_size());
    assert_eq!(header.key_size, 70_000);
    assert_eq!(header.value_size, 300_000);
  }

  #[test]
  fn test_log_record_pos_encode_and_decode() {
    let pos = LogRecordPos {
      file_id: 3,
      offset: 1_048_576,
      size: 77,
      created_at: 1_700_000_000_000,
      expires_at: Some(1_700_000_005_000),
    };
    assert_eq!(LogRecordPos::decode(&pos.encode()), Ok(pos));

    let pos = LogRecordPos { expires_at: None, ..pos };
    let enc = pos.encode();
    assert_eq!(LogRecordPos::decode(&enc), Ok(pos));
    assert_eq!(
      LogRecordPos::decode(&enc[..enc.len() - 1]),
      Err(Errors::HintFileCorrupted)
    );
  }

  #[test]
  fn test_is_expired() {
    let rec = LogRecord::normal(b"k".to_vec(), b"v".to_vec(), 0, Some(100));
    assert!(!rec.is_expired(99));
    assert!(rec.is_expired(100));

    let forever = LogRecord::normal(b"k".to_vec(), b"v".to_vec(), 0, None);
    assert!(!forever.is_expired(u64::MAX));
  }
}
