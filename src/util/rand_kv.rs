use bytes::Bytes;
use rand::{distr::Alphanumeric, Rng};

#[allow(dead_code)]
pub fn get_test_key(i: usize) -> Bytes {
  Bytes::from(format!("barrel-kv-key-{:09}", i))
}

#[allow(dead_code)]
pub fn get_test_value(i: usize) -> Bytes {
  let suffix: String = rand::rng()
    .sample_iter(&Alphanumeric)
    .take(16)
    .map(char::from)
    .collect();
  Bytes::from(format!("barrel-kv-value-{:09}-{}", i, suffix))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_get_test_key_value() {
    for i in 0..=10 {
      assert!(!get_test_key(i).is_empty());
    }
    assert_eq!(get_test_key(7), get_test_key(7));
    assert_ne!(get_test_value(7), get_test_value(7));
  }
}
