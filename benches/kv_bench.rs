use std::time::Duration;

use barrel_kv::{
  db::Engine,
  option::Options,
  util::rand_kv::{get_test_key, get_test_value},
};
use criterion::{criterion_group, criterion_main, Criterion};
use rand::Rng;
use tempfile::TempDir;

fn open_engine(dir: &TempDir, preload: usize) -> Engine {
  let mut option = Options::default();
  option.dir_path = dir.path().to_path_buf();
  let engine = Engine::open(option).unwrap();

  for i in 0..preload {
    let res = engine.put(get_test_key(i), get_test_value(i));
    assert!(res.is_ok());
  }
  engine
}

fn bench_put(c: &mut Criterion) {
  let dir = tempfile::tempdir().unwrap();
  let engine = open_engine(&dir, 0);
  let mut rnd = rand::rng();

  c.bench_function("barrel-kv-put-bench", |b| {
    b.iter(|| {
      let i = rnd.random_range(0..u32::MAX) as usize;
      let res = engine.put(get_test_key(i), get_test_value(i));
      assert!(res.is_ok());
    })
  });
}

fn bench_put_with_ttl(c: &mut Criterion) {
  let dir = tempfile::tempdir().unwrap();
  let engine = open_engine(&dir, 0);
  let mut rnd = rand::rng();

  c.bench_function("barrel-kv-put-ttl-bench", |b| {
    b.iter(|| {
      let i = rnd.random_range(0..u32::MAX) as usize;
      let res = engine.put_with_ttl(get_test_key(i), get_test_value(i), Duration::from_secs(3600));
      assert!(res.is_ok());
    })
  });
}

fn bench_get(c: &mut Criterion) {
  let dir = tempfile::tempdir().unwrap();
  let engine = open_engine(&dir, 100000);
  let mut rnd = rand::rng();

  c.bench_function("barrel-kv-get-bench", |b| {
    b.iter(|| {
      let i = rnd.random_range(0..200000);
      let res = engine.get(get_test_key(i));
      assert_eq!(res.is_ok(), i < 100000);
    })
  });
}

fn bench_delete(c: &mut Criterion) {
  let dir = tempfile::tempdir().unwrap();
  let engine = open_engine(&dir, 100000);
  let mut rnd = rand::rng();

  c.bench_function("barrel-kv-delete-bench", |b| {
    b.iter(|| {
      let i = rnd.random_range(0..u32::MAX) as usize;
      engine.delete(get_test_key(i)).unwrap();
    })
  });
}

fn bench_list(c: &mut Criterion) {
  let dir = tempfile::tempdir().unwrap();
  let engine = open_engine(&dir, 100000);

  c.bench_function("barrel-kv-list-bench", |b| {
    b.iter(|| {
      let res = engine.list();
      assert!(res.is_ok());
    })
  });
}

fn bench_stat(c: &mut Criterion) {
  let dir = tempfile::tempdir().unwrap();
  let engine = open_engine(&dir, 100000);

  c.bench_function("barrel-kv-stat-bench", |b| {
    b.iter(|| {
      let res = engine.stat();
      assert!(res.is_ok());
    })
  });
}

fn bench_open(c: &mut Criterion) {
  let dir = tempfile::tempdir().unwrap();
  let engine = open_engine(&dir, 100000);
  engine.compact().unwrap();
  engine.shutdown().unwrap();

  let mut option = Options::default();
  option.dir_path = dir.path().to_path_buf();
  c.bench_function("barrel-kv-open-bench", |b| {
    b.iter(|| {
      let engine = Engine::open(option.clone()).unwrap();
      engine.shutdown().unwrap();
    })
  });
}

criterion_group!(
  benches,
  bench_get,
  bench_put,
  bench_put_with_ttl,
  bench_delete,
  bench_list,
  bench_stat,
  bench_open
);
criterion_main!(benches);
