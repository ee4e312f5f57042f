//! Frozen fetch outcomes: planned cache mutations, events, and metadata.

// self
use crate::{
	_prelude::*,
	cache::{
		entry::{CacheEntry, CacheKey, Payload},
		store::CacheStore,
	},
	events::Event,
};

/// An intended cache mutation, described without being performed.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheOperation {
	/// Insert or replace the entry for `key`.
	Set {
		/// Target key.
		key: CacheKey,
		/// Entry to store.
		entry: CacheEntry,
	},
	/// Replace the entry for `key` with a recency-refreshed copy (LRU
	/// promotion on a cache hit).
	Update {
		/// Target key.
		key: CacheKey,
		/// Promoted entry to store.
		entry: CacheEntry,
	},
	/// Remove the entry for `key`.
	Delete {
		/// Target key.
		key: CacheKey,
	},
}

/// Bookkeeping describing how a plan was produced.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanMeta {
	/// Key the plan resolves.
	pub cache_key: CacheKey,
	/// Timestamp the plan was computed against.
	pub timestamp: DateTime<Utc>,
	/// Number of expired entries swept out of the snapshot.
	pub expired_keys_removed: usize,
	/// Attempt counter as seen by the planning layer (always 1; retries live
	/// inside the default network provider).
	pub attempt: u32,
	/// Whether the plan involved a network attempt.
	pub network_request: bool,
}

/// Immutable description of what satisfying a fetch should do.
///
/// Produced from a cache snapshot and a timestamp without touching live
/// state. The fetcher applies [`cache_operations`](Self::cache_operations) in
/// order, then emits [`events`](Self::events) in order, then surfaces the
/// [`outcome`](Self::outcome). Fields are private so a constructed plan can
/// never be altered.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchPlan<S> {
	success: bool,
	payload: Option<Payload>,
	error: Option<Error>,
	from_cache: bool,
	cache_operations: Vec<CacheOperation>,
	events: Vec<Event>,
	new_cache_state: S,
	meta: PlanMeta,
}
impl<S: CacheStore> FetchPlan<S> {
	pub(crate) fn succeeded(
		payload: Payload,
		from_cache: bool,
		cache_operations: Vec<CacheOperation>,
		events: Vec<Event>,
		new_cache_state: S,
		meta: PlanMeta,
	) -> Self {
		Self {
			success: true,
			payload: Some(payload),
			error: None,
			from_cache,
			cache_operations,
			events,
			new_cache_state,
			meta,
		}
	}

	pub(crate) fn failed(
		error: Error,
		cache_operations: Vec<CacheOperation>,
		events: Vec<Event>,
		new_cache_state: S,
		meta: PlanMeta,
	) -> Self {
		Self {
			success: false,
			payload: None,
			error: Some(error),
			from_cache: false,
			cache_operations,
			events,
			new_cache_state,
			meta,
		}
	}

	/// Whether the fetch resolved to data.
	pub fn success(&self) -> bool {
		self.success
	}

	/// Payload to return to the caller, when successful.
	pub fn payload(&self) -> Option<&Payload> {
		self.payload.as_ref()
	}

	/// Error to surface, when failed.
	pub fn error(&self) -> Option<&Error> {
		self.error.as_ref()
	}

	/// Whether the payload came from the cache rather than the network.
	pub fn from_cache(&self) -> bool {
		self.from_cache
	}

	/// Cache mutations to apply, in order, before any event is emitted.
	pub fn cache_operations(&self) -> &[CacheOperation] {
		&self.cache_operations
	}

	/// Lifecycle events to emit, in order, after the mutations are applied.
	pub fn events(&self) -> &[Event] {
		&self.events
	}

	/// Proposed cache snapshot after the plan is applied.
	pub fn new_cache_state(&self) -> &S {
		&self.new_cache_state
	}

	/// Plan bookkeeping.
	pub fn meta(&self) -> &PlanMeta {
		&self.meta
	}

	/// The plan's terminal outcome: payload on success, error otherwise.
	pub fn outcome(&self) -> Result<Payload> {
		match (&self.payload, &self.error) {
			(Some(payload), _) => Ok(payload.clone()),
			(None, Some(error)) => Err(error.clone()),
			(None, None) => Err(Error::Cancelled),
		}
	}
}
