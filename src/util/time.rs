use std::time::Duration;

use time::OffsetDateTime;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
  let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
  (nanos / 1_000_000).max(0) as u64
}

/// Absolute expiry timestamp for a record written at `now` with `ttl`.
pub fn expires_at(now: u64, ttl: Duration) -> u64 {
  now.saturating_add(ttl.as_millis().min(u64::MAX as u128) as u64)
}
