use std::time::Duration;

use barrel_kv::{db::Engine, option::Options};
use bytes::Bytes;

fn main() {
  env_logger::init();

  let mut opts = Options::default();
  opts.dir_path = std::env::temp_dir().join("barrel-kv-demo");
  opts.sync_writes = true;
  opts.max_active_file_size = 1 << 4;
  let engine = Engine::open(opts).expect("failed to open barrel-kv engine");

  engine
    .put_with_ttl(Bytes::from("hello"), Bytes::from("world"), Duration::from_secs(5))
    .expect("failed to put hello");
  engine
    .put(Bytes::from("good"), Bytes::from("bye"))
    .expect("failed to put good");

  let val = engine.get(Bytes::from("hello")).expect("failed to get hello");
  println!("{}", String::from_utf8_lossy(&val));

  let val = engine.get(Bytes::from("good")).expect("failed to get good");
  println!("{}", String::from_utf8_lossy(&val));

  let keys = engine.list().expect("failed to list keys");
  println!("{:?}", keys);

  let stat = engine.stat().expect("failed to stat engine");
  println!(
    "keys: {}, data files: {}, reclaimable: {} bytes, on disk: {} bytes",
    stat.key_num, stat.data_file_num, stat.reclaimable_size, stat.disk_size
  );

  engine.shutdown().expect("failed to shut down engine");
}
