//! Cache entry definitions and validity rules.

// crates.io
use serde_json::Value;
// self
use crate::_prelude::*;

/// Stable identifier for a cache entry and its in-flight slot.
///
/// Derived from the request URL; by default it *is* the URL.
pub type CacheKey = Arc<str>;

/// Decoded JSON payload. Opaque to the engine.
pub type Payload = Arc<Value>;

/// A cached payload with its insertion time and expiry deadline.
///
/// `inserted_at` doubles as the LRU recency key: every cache hit refreshes it
/// to the lookup time via [`CacheEntry::promoted`].
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
	/// Cached payload.
	pub payload: Payload,
	/// Timestamp of insertion, refreshed on every hit.
	pub inserted_at: DateTime<Utc>,
	/// Deadline after which the entry no longer satisfies lookups.
	pub expires_at: DateTime<Utc>,
}
impl CacheEntry {
	/// Build an entry inserted at `now` that expires after `ttl`.
	///
	/// A zero `ttl` yields `expires_at == inserted_at`: the entry is stored
	/// but already expired for any later read.
	pub fn fresh(payload: Payload, now: DateTime<Utc>, ttl: Duration) -> Self {
		Self { payload, inserted_at: now, expires_at: saturating_add(now, ttl) }
	}

	/// Whether the entry still satisfies lookups at `now`.
	///
	/// Validity is strict: an entry whose deadline equals `now` is expired.
	pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
		now < self.expires_at
	}

	/// Whether the entry is past its expiry deadline at `now`.
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		!self.is_valid(now)
	}

	/// Copy of the entry with `inserted_at` refreshed for LRU promotion.
	///
	/// `expires_at` is preserved; promotion never extends an entry's life.
	pub fn promoted(&self, now: DateTime<Utc>) -> Self {
		Self { payload: self.payload.clone(), inserted_at: now, expires_at: self.expires_at }
	}
}

/// Add a std duration to a UTC timestamp, saturating instead of overflowing.
fn saturating_add(timestamp: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
	TimeDelta::from_std(duration)
		.ok()
		.and_then(|delta| timestamp.checked_add_signed(delta))
		.unwrap_or(DateTime::<Utc>::MAX_UTC)
}
