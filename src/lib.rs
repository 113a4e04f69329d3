//! Barrel-KV: an embedded log-structured key/value store in the style of
//! Bitcask.
//!
//! Every write is appended to the active data file and the in-memory keydir
//! records where the newest value of each key lives, so a read costs one
//! positional read. Background sweeps keep the log in check:
//!
//! * rotation retires the active file once it grows past
//!   `max_active_file_size`;
//! * compaction tombstones expired keys, optionally merges the stale files,
//!   and writes a keydir snapshot (the hint file) that shortens recovery.
//!
//! # Basic Usage
//!
//! ```
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use barrel_kv::{db::Engine, option::Options};
//!
//! let dir = tempfile::tempdir().expect("failed to create a temp dir");
//! let mut opts = Options::default();
//! opts.dir_path = dir.path().to_path_buf();
//! let engine = Engine::open(opts).expect("failed to open barrel-kv engine");
//!
//! engine
//!   .put(Bytes::from("hello"), Bytes::from("world"))
//!   .expect("failed to put");
//! assert_eq!(engine.get(Bytes::from("hello")).unwrap(), Bytes::from("world"));
//!
//! // reads as absent once the ttl is over
//! engine
//!   .put_with_ttl(Bytes::from("session"), Bytes::from("token"), Duration::from_secs(60))
//!   .expect("failed to put");
//!
//! engine.delete(Bytes::from("hello")).expect("failed to delete");
//! engine.shutdown().expect("failed to shut down");
//! ```

mod compact;
mod data;
mod fio;
mod hint;
mod index;
mod merge;
mod sweeper;

pub mod db;
pub mod errors;
pub mod option;
pub mod util;
