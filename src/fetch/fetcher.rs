//! The per-key fetch pipeline.

// crates.io
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{
		entry::{CacheEntry, CacheKey, Payload},
		store::{CacheStore, MemoryCache},
	},
	clock::Clock,
	events::{Event, EventBus},
	fetch::plan::{CacheOperation, FetchPlan, PlanMeta},
	http::client::NetworkProvider,
};

/// Single-key fetch pipeline bound to a shared cache.
///
/// A fetcher resolves one cache key: it sweeps expired entries, serves valid
/// hits with LRU promotion, and otherwise asks its network provider for fresh
/// data. Instances are immutable after construction; reconfiguration replaces
/// the instance (see
/// [`Coordinator::set_retry_policy`](crate::coordinator::Coordinator::set_retry_policy)).
#[derive(Clone, Debug)]
pub struct Fetcher<S: CacheStore = MemoryCache> {
	cache_key: CacheKey,
	url: Url,
	cache: Arc<RwLock<S>>,
	provider: Arc<dyn NetworkProvider>,
	clock: Arc<dyn Clock>,
	default_expiration: Duration,
	bus: Arc<EventBus>,
	cancel: CancellationToken,
}
impl<S: CacheStore> Fetcher<S> {
	/// Bind a fetcher to its key, URL, shared cache, and collaborators.
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		cache_key: CacheKey,
		url: Url,
		cache: Arc<RwLock<S>>,
		provider: Arc<dyn NetworkProvider>,
		clock: Arc<dyn Clock>,
		default_expiration: Duration,
		bus: Arc<EventBus>,
		cancel: CancellationToken,
	) -> Self {
		Self { cache_key, url, cache, provider, clock, default_expiration, bus, cancel }
	}

	/// Key this fetcher resolves.
	pub fn cache_key(&self) -> &CacheKey {
		&self.cache_key
	}

	/// URL this fetcher requests.
	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Event bus carrying this fetcher's lifecycle notifications.
	pub fn bus(&self) -> &Arc<EventBus> {
		&self.bus
	}

	/// Compute what satisfying the fetch should do, without side effects.
	///
	/// The decision tree over the snapshot at `now`:
	///
	/// 1. sweep expired entries (recording a `Delete` per key);
	/// 2. a surviving entry for the key is a hit: promote its recency via an
	///    `Update` and return it, with no events;
	/// 3. otherwise record `LoadingStart`, consult `provider` (falling back
	///    to the one bound at construction), and either store the fresh
	///    payload (`Delete`s for LRU victims, then a `Set`, then `Success`)
	///    or capture the failure (`Error` event).
	///
	/// The snapshot itself is never mutated, and identical inputs with a
	/// deterministic provider produce structurally equal plans.
	pub async fn plan(
		&self,
		snapshot: &S,
		now: DateTime<Utc>,
		provider: Option<&dyn NetworkProvider>,
	) -> FetchPlan<S> {
		let mut cleaned = snapshot.clone();
		let expired = cleaned.clean_expired(now);
		let mut operations = expired
			.iter()
			.map(|key| CacheOperation::Delete { key: key.clone() })
			.collect::<Vec<_>>();
		let meta = |network_request: bool| PlanMeta {
			cache_key: self.cache_key.clone(),
			timestamp: now,
			expired_keys_removed: expired.len(),
			attempt: 1,
			network_request,
		};

		// Anything that survived the sweep is valid at `now`.
		if let Some(entry) = cleaned.get(&self.cache_key).cloned() {
			let promoted = entry.promoted(now);

			cleaned.set(self.cache_key.clone(), promoted.clone());
			operations.push(CacheOperation::Update { key: self.cache_key.clone(), entry: promoted });

			tracing::debug!(key = %self.cache_key, "cache hit");

			return FetchPlan::succeeded(
				entry.payload,
				true,
				operations,
				Vec::new(),
				cleaned,
				meta(false),
			);
		}

		let mut events =
			vec![Event::LoadingStart { url: self.url.clone(), cache_key: self.cache_key.clone() }];
		let provider = provider.unwrap_or(self.provider.as_ref());

		match provider.fetch(&self.url, &self.cancel).await {
			Ok(payload) => {
				let entry = CacheEntry::fresh(payload.clone(), now, self.default_expiration);
				let evicted = cleaned.set(self.cache_key.clone(), entry.clone());

				// The store may evict the entry it just admitted when the
				// bound is zero; applying `Set` to a live store repeats that
				// eviction, so no `Delete` is planned for the key itself.
				operations.extend(
					evicted
						.into_iter()
						.filter(|key| *key != self.cache_key)
						.map(|key| CacheOperation::Delete { key }),
				);
				operations.push(CacheOperation::Set { key: self.cache_key.clone(), entry });
				events.push(Event::Success { payload: payload.clone() });

				tracing::debug!(key = %self.cache_key, "fetched fresh payload");

				FetchPlan::succeeded(payload, false, operations, events, cleaned, meta(true))
			},
			Err(error) => {
				events.push(Event::Error { error: error.clone() });

				tracing::debug!(key = %self.cache_key, error = %error, "fetch failed");

				FetchPlan::failed(error, operations, events, cleaned, meta(true))
			},
		}
	}

	/// Satisfy the fetch against live state.
	///
	/// Snapshots the shared cache, plans against it, applies the planned
	/// mutations in order under the write lock, emits the planned events in
	/// order, and returns the outcome. Snapshot staleness is tolerable
	/// because the coordinator admits at most one effectful fetch per key at
	/// a time.
	pub async fn fetch(&self) -> Result<Payload> {
		let snapshot = { self.cache.read().await.clone() };
		let plan = self.plan(&snapshot, self.clock.now(), None).await;

		{
			let mut cache = self.cache.write().await;

			for operation in plan.cache_operations() {
				match operation {
					CacheOperation::Set { key, entry } | CacheOperation::Update { key, entry } => {
						cache.set(key.clone(), entry.clone());
					},
					CacheOperation::Delete { key } => {
						cache.delete(key);
					},
				}
			}
		}

		for event in plan.events() {
			self.bus.notify(event);
		}

		plan.outcome()
	}
}
