//! Cache storage: the [`CacheStore`] contract and the default in-memory
//! store.

// std
use std::{collections::BTreeMap, fmt::Debug};
// self
use crate::{
	_prelude::*,
	cache::entry::{CacheEntry, CacheKey},
};

/// Contract for keyed cache storage with expiry and LRU bounds.
///
/// `get` is a plain mapping lookup: it returns entries regardless of expiry,
/// and callers judge validity against the current time. Mutating operations
/// must leave `len() <= max_size()`. None of the operations perform I/O or
/// fail.
pub trait CacheStore: Clone + Debug + Send + Sync + 'static {
	/// Whether an entry exists for `key`, expired or not.
	fn has(&self, key: &str) -> bool;

	/// Look up the entry for `key`, expired or not.
	fn get(&self, key: &str) -> Option<&CacheEntry>;

	/// Insert or replace the entry for `key`.
	///
	/// Returns the keys evicted (oldest `inserted_at` first) to keep the
	/// store within `max_size`; with a zero bound this includes `key` itself.
	fn set(&mut self, key: CacheKey, entry: CacheEntry) -> Vec<CacheKey>;

	/// Remove the entry for `key`, reporting whether it existed.
	fn delete(&mut self, key: &str) -> bool;

	/// Remove every entry.
	fn clear(&mut self);

	/// Number of stored entries.
	fn len(&self) -> usize;

	/// Whether the store holds no entries.
	fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// List `(key, entry)` pairs.
	///
	/// Ordering is implementation-defined but must be stable within a single
	/// call; it decides eviction tie-breaks between equally old entries.
	fn entries(&self) -> Vec<(CacheKey, CacheEntry)>;

	/// Maximum number of entries retained after any mutation.
	fn max_size(&self) -> usize;

	/// Expiry applied to entries stored without an explicit deadline.
	fn default_expiration(&self) -> Duration;

	/// Delete every entry whose deadline has passed at `now`, returning the
	/// removed keys in listing order.
	fn clean_expired(&mut self, now: DateTime<Utc>) -> Vec<CacheKey> {
		let expired = self
			.entries()
			.into_iter()
			.filter(|(_, entry)| entry.is_expired(now))
			.map(|(key, _)| key)
			.collect::<Vec<_>>();

		for key in &expired {
			self.delete(key);
		}

		expired
	}

	/// Evict oldest-first until the store is back within `max_size`.
	fn evict_lru(&mut self) -> Vec<CacheKey> {
		let mut evicted = Vec::new();

		while self.len() > self.max_size() {
			let victim = self
				.entries()
				.into_iter()
				.min_by(|(_, a), (_, b)| a.inserted_at.cmp(&b.inserted_at))
				.map(|(key, _)| key);

			match victim {
				Some(key) => {
					self.delete(&key);
					evicted.push(key);
				},
				None => break,
			}
		}

		evicted
	}
}

/// In-memory [`CacheStore`] backed by an ordered map.
///
/// Listing order is key order, which also decides the eviction tie-break
/// between entries with equal `inserted_at`.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryCache {
	entries: BTreeMap<CacheKey, CacheEntry>,
	max_size: usize,
	default_expiration: Duration,
}
impl MemoryCache {
	/// Create an empty store with the given bounds.
	pub fn new(max_size: usize, default_expiration: Duration) -> Self {
		Self { entries: BTreeMap::new(), max_size, default_expiration }
	}
}
impl CacheStore for MemoryCache {
	fn has(&self, key: &str) -> bool {
		self.entries.contains_key(key)
	}

	fn get(&self, key: &str) -> Option<&CacheEntry> {
		self.entries.get(key)
	}

	fn set(&mut self, key: CacheKey, entry: CacheEntry) -> Vec<CacheKey> {
		self.entries.insert(key, entry);
		self.evict_lru()
	}

	fn delete(&mut self, key: &str) -> bool {
		self.entries.remove(key).is_some()
	}

	fn clear(&mut self) {
		self.entries.clear();
	}

	fn len(&self) -> usize {
		self.entries.len()
	}

	fn entries(&self) -> Vec<(CacheKey, CacheEntry)> {
		self.entries.iter().map(|(key, entry)| (key.clone(), entry.clone())).collect()
	}

	fn max_size(&self) -> usize {
		self.max_size
	}

	fn default_expiration(&self) -> Duration {
		self.default_expiration
	}
}
