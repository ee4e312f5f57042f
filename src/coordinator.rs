//! Multi-key orchestration: per-key fetcher reuse, in-flight deduplication,
//! a shared cache, and periodic cleanup.

// std
use std::{
	collections::HashMap,
	sync::{
		Mutex as StdMutex, PoisonError,
		atomic::{AtomicBool, Ordering},
	},
};
// crates.io
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::{
	sync::{Mutex, RwLock, watch},
	task::JoinHandle,
	time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{
		entry::{CacheKey, Payload},
		store::{CacheStore, MemoryCache},
	},
	clock::{Clock, SystemClock},
	events::{EventBus, Observer},
	fetch::fetcher::Fetcher,
	http::{
		client::{HttpProvider, NetworkProvider},
		retry::{DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_MIN_BACKOFF, RetryPolicy},
	},
};

/// Default bound on the number of cached entries.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 100;
/// Default expiry applied to fresh cache entries.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(5 * 60);
/// Default period of the background cleanup sweep.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for a [`Coordinator`].
///
/// Unknown fields are rejected when deserializing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
	/// Bound on the number of cached entries; zero disables retention.
	pub max_cache_size: usize,
	/// Expiry applied to fresh cache entries.
	pub default_expiration: Duration,
	/// Period of the background cleanup sweep.
	pub cleanup_interval: Duration,
	/// Retry behaviour for the default network provider.
	pub retry_policy: RetryPolicy,
	/// Timeout applied to each individual network attempt.
	pub per_attempt_timeout: Duration,
	/// Floor applied to computed backoff delays.
	pub min_backoff: Duration,
}
impl Config {
	/// Validate invariants for coordinator configuration.
	pub fn validate(&self) -> Result<()> {
		if self.cleanup_interval.is_zero() {
			return Err(Error::Validation {
				field: "cleanup_interval",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.per_attempt_timeout < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "per_attempt_timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}

		self.retry_policy.validate()
	}
}
impl Default for Config {
	fn default() -> Self {
		Self {
			max_cache_size: DEFAULT_MAX_CACHE_SIZE,
			default_expiration: DEFAULT_EXPIRATION,
			cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
			retry_policy: RetryPolicy::default(),
			per_attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
			min_backoff: DEFAULT_MIN_BACKOFF,
		}
	}
}

/// Per-key overrides merged over the coordinator defaults when a fetcher is
/// first created for a key.
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
	/// Request URL, when the cache key is not itself the URL.
	pub url: Option<Url>,
	/// Retry behaviour replacing the configured policy.
	pub retry_policy: Option<RetryPolicy>,
	/// Per-attempt timeout replacing the configured one.
	pub per_attempt_timeout: Option<Duration>,
	/// Entry expiry replacing the configured one.
	pub default_expiration: Option<Duration>,
}

/// Point-in-time operational counters.
#[derive(Clone, Debug, Serialize)]
pub struct Stats {
	/// Number of fetchers currently bound to keys.
	pub active_fetchers: usize,
	/// Number of requests currently in flight.
	pub inflight_requests: usize,
	/// Number of cached entries, expired ones included.
	pub cache_size: usize,
	/// Configured cache bound.
	pub max_cache_size: usize,
	/// Cached entries currently past their expiry deadline.
	pub expired_entry_count: usize,
	/// Timestamp of the most recent cleanup pass, if any ran.
	pub last_cleanup_at: Option<DateTime<Utc>>,
}

/// Builder for [`Coordinator`] wiring configuration and collaborators.
///
/// The network provider, clock, and cache store are injection points;
/// omitting them yields the retrying reqwest provider, the system clock, and
/// an in-memory store sized from the configuration.
#[derive(Debug)]
pub struct CoordinatorBuilder<S: CacheStore = MemoryCache> {
	config: Config,
	store: Option<S>,
	provider: Option<Arc<dyn NetworkProvider>>,
	clock: Option<Arc<dyn Clock>>,
}
impl CoordinatorBuilder<MemoryCache> {
	/// Create a builder with default configuration.
	pub fn new() -> Self {
		Self::default()
	}

	/// Finalise the configuration and start the coordinator.
	///
	/// Must be called within a tokio runtime; the periodic cleanup task
	/// starts immediately.
	pub fn build(self) -> Result<Coordinator<MemoryCache>> {
		let Self { config, store, provider, clock } = self;
		let store = store
			.unwrap_or_else(|| MemoryCache::new(config.max_cache_size, config.default_expiration));

		Coordinator::assemble(config, store, provider, clock)
	}
}
impl<S: CacheStore> CoordinatorBuilder<S> {
	/// Replace the whole configuration record.
	pub fn config(mut self, config: Config) -> Self {
		self.config = config;

		self
	}

	/// Override the cached-entry bound.
	pub fn max_cache_size(mut self, value: usize) -> Self {
		self.config.max_cache_size = value;

		self
	}

	/// Override the expiry applied to fresh entries.
	pub fn default_expiration(mut self, value: Duration) -> Self {
		self.config.default_expiration = value;

		self
	}

	/// Override the cleanup period.
	pub fn cleanup_interval(mut self, value: Duration) -> Self {
		self.config.cleanup_interval = value;

		self
	}

	/// Override the retry policy of the default provider.
	pub fn retry_policy(mut self, value: RetryPolicy) -> Self {
		self.config.retry_policy = value;

		self
	}

	/// Override the per-attempt timeout.
	pub fn per_attempt_timeout(mut self, value: Duration) -> Self {
		self.config.per_attempt_timeout = value;

		self
	}

	/// Override the backoff floor.
	pub fn min_backoff(mut self, value: Duration) -> Self {
		self.config.min_backoff = value;

		self
	}

	/// Inject a network provider, replacing the retrying reqwest default.
	pub fn network_provider(mut self, provider: Arc<dyn NetworkProvider>) -> Self {
		self.provider = Some(provider);

		self
	}

	/// Inject a clock, replacing the system clock.
	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);

		self
	}

	/// Seed the coordinator with a pre-populated (or alternative) store.
	pub fn store<S2: CacheStore>(self, store: S2) -> CoordinatorBuilder<S2> {
		CoordinatorBuilder {
			config: self.config,
			store: Some(store),
			provider: self.provider,
			clock: self.clock,
		}
	}

	/// Finalise the configuration around the supplied store.
	pub fn build_with_store(self) -> Result<Coordinator<S>> {
		let Self { config, store, provider, clock } = self;
		let store = store.ok_or_else(|| Error::Validation {
			field: "store",
			reason: "A cache store must be supplied.".into(),
		})?;

		Coordinator::assemble(config, store, provider, clock)
	}
}
impl<S: CacheStore> Default for CoordinatorBuilder<S> {
	fn default() -> Self {
		Self { config: Config::default(), store: None, provider: None, clock: None }
	}
}

/// Shared handle coordinating per-key fetchers over one cache.
///
/// Cloning is cheap; every clone drives the same state. All operations take
/// `&self` and may be called from any task. After [`shutdown`](Self::shutdown)
/// every operation fails with [`Error::Cancelled`].
#[derive(Clone, Debug)]
pub struct Coordinator<S: CacheStore = MemoryCache> {
	inner: Arc<Inner<S>>,
}
impl Coordinator<MemoryCache> {
	/// Start a coordinator over an in-memory cache.
	///
	/// Must be called within a tokio runtime; the periodic cleanup task
	/// starts immediately.
	pub fn new(config: Config) -> Result<Self> {
		Self::builder().config(config).build()
	}

	/// Create a [`CoordinatorBuilder`] for advanced configuration.
	pub fn builder() -> CoordinatorBuilder<MemoryCache> {
		CoordinatorBuilder::new()
	}
}
impl<S: CacheStore> Coordinator<S> {
	fn assemble(
		config: Config,
		store: S,
		provider: Option<Arc<dyn NetworkProvider>>,
		clock: Option<Arc<dyn Clock>>,
	) -> Result<Self> {
		config.validate()?;

		let client = HttpProvider::default_client()?;
		// The store carries its own bounds; fresh entries inherit its expiry
		// rather than the configured default, which only sizes the default
		// in-memory store.
		let default_expiration = store.default_expiration();
		let coordinator = Self {
			inner: Arc::new(Inner {
				config,
				default_expiration,
				cache: Arc::new(RwLock::new(store)),
				client,
				provider,
				clock: clock.unwrap_or_else(|| Arc::new(SystemClock)),
				fetchers: RwLock::new(HashMap::new()),
				inflight: Mutex::new(HashMap::new()),
				cancel: CancellationToken::new(),
				shut_down: AtomicBool::new(false),
				last_cleanup: StdMutex::new(None),
				cleanup_task: StdMutex::new(None),
			}),
		};

		coordinator.spawn_cleanup();

		Ok(coordinator)
	}

	fn spawn_cleanup(&self) {
		let weak = Arc::downgrade(&self.inner);
		let cancel = self.inner.cancel.clone();
		let period = self.inner.config.cleanup_interval;
		let handle = tokio::spawn(async move {
			let mut ticker = time::interval(period);

			ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
			// The first tick completes immediately.
			ticker.tick().await;

			loop {
				tokio::select! {
					() = cancel.cancelled() => break,
					_ = ticker.tick() => {},
				}

				let Some(inner) = weak.upgrade() else { break };

				inner.run_cleanup().await;
			}
		});

		*self.inner.cleanup_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
	}

	fn ensure_live(&self) -> Result<()> {
		if self.inner.shut_down.load(Ordering::SeqCst) {
			Err(Error::Cancelled)
		} else {
			Ok(())
		}
	}

	/// Existing fetcher for `key`, or a new one bound to the shared cache and
	/// the default configuration. Idempotent for equal keys.
	pub async fn fetcher(&self, key: &str) -> Result<Arc<Fetcher<S>>> {
		self.fetcher_with(key, &FetchOptions::default()).await
	}

	/// Like [`fetcher`](Self::fetcher), merging `options` over the defaults
	/// when the fetcher does not exist yet.
	pub async fn fetcher_with(&self, key: &str, options: &FetchOptions) -> Result<Arc<Fetcher<S>>> {
		self.ensure_live()?;

		{
			let fetchers = self.inner.fetchers.read().await;

			if let Some(fetcher) = fetchers.get(key) {
				return Ok(fetcher.clone());
			}
		}

		let fetcher = Arc::new(self.build_fetcher(key, options, None)?);
		let mut fetchers = self.inner.fetchers.write().await;

		Ok(fetchers.entry(CacheKey::from(key)).or_insert(fetcher).clone())
	}

	fn build_fetcher(
		&self,
		key: &str,
		options: &FetchOptions,
		bus: Option<Arc<EventBus>>,
	) -> Result<Fetcher<S>> {
		let url = match &options.url {
			Some(url) => url.clone(),
			None => Url::parse(key)?,
		};
		let provider = match &self.inner.provider {
			Some(provider) => provider.clone(),
			None => {
				let policy = options
					.retry_policy
					.clone()
					.unwrap_or_else(|| self.inner.config.retry_policy.clone());

				policy.validate()?;

				Arc::new(HttpProvider::new(
					self.inner.client.clone(),
					policy,
					options.per_attempt_timeout.unwrap_or(self.inner.config.per_attempt_timeout),
					self.inner.config.min_backoff,
				)) as Arc<dyn NetworkProvider>
			},
		};

		Ok(Fetcher::new(
			CacheKey::from(key),
			url,
			self.inner.cache.clone(),
			provider,
			self.inner.clock.clone(),
			options.default_expiration.unwrap_or(self.inner.default_expiration),
			bus.unwrap_or_default(),
			self.inner.cancel.child_token(),
		))
	}

	/// Satisfy a request for `key`, deduplicating concurrent callers.
	///
	/// If a request for the key is already in flight the caller joins it and
	/// receives the same outcome; otherwise a slot is registered and the
	/// fetch pipeline runs. A call arriving after a slot resolved starts over
	/// from the cache.
	pub async fn fetch(&self, key: &str) -> Result<Payload> {
		self.fetch_with(key, &FetchOptions::default()).await
	}

	/// Like [`fetch`](Self::fetch) with per-key overrides, applied only when
	/// the key's fetcher does not exist yet.
	pub async fn fetch_with(&self, key: &str, options: &FetchOptions) -> Result<Payload> {
		self.ensure_live()?;

		let fetcher = self.fetcher_with(key, options).await?;
		// Check-and-register under one critical section so two callers can
		// never both miss the lookup and both start attempts.
		let mut receiver = {
			let mut inflight = self.inner.inflight.lock().await;

			match inflight.get(key).cloned() {
				Some(receiver) => receiver,
				None => {
					let (sender, receiver) = watch::channel(None);
					let slot_key = CacheKey::from(key);

					inflight.insert(slot_key.clone(), receiver.clone());

					let inner = self.inner.clone();

					tokio::spawn(async move {
						let outcome = fetcher.fetch().await;

						// Publish before vacating the slot: joiners holding
						// the receiver resolve, and only later callers start
						// a fresh attempt.
						let _ = sender.send(Some(outcome));

						inner.inflight.lock().await.remove(&slot_key);
					});

					receiver
				},
			}
		};

		loop {
			{
				let outcome = receiver.borrow_and_update();

				if let Some(outcome) = outcome.as_ref() {
					return outcome.clone();
				}
			}

			if receiver.changed().await.is_err() {
				return Err(Error::Cancelled);
			}
		}
	}

	/// Issue [`fetch`](Self::fetch) for every key concurrently.
	///
	/// Returns outcomes parallel to `keys`; one key's failure never cancels
	/// the others.
	pub async fn fetch_many<I, K>(&self, keys: I) -> Vec<Result<Payload>>
	where
		I: IntoIterator<Item = K>,
		K: AsRef<str>,
	{
		let handles = keys
			.into_iter()
			.map(|key| {
				let coordinator = self.clone();
				let key = key.as_ref().to_owned();

				tokio::spawn(async move { coordinator.fetch(&key).await })
			})
			.collect::<Vec<JoinHandle<Result<Payload>>>>();
		let mut outcomes = Vec::with_capacity(handles.len());

		for handle in handles {
			outcomes.push(handle.await.unwrap_or(Err(Error::Cancelled)));
		}

		outcomes
	}

	/// Valid cached payload for `key`, promoting its recency; stale entries
	/// are deleted and yield `None`.
	pub async fn cached_value(&self, key: &str) -> Result<Option<Payload>> {
		self.ensure_live()?;

		let now = self.inner.clock.now();
		let mut cache = self.inner.cache.write().await;

		match cache.get(key).cloned() {
			Some(entry) if entry.is_valid(now) => {
				cache.set(CacheKey::from(key), entry.promoted(now));

				Ok(Some(entry.payload))
			},
			Some(_) => {
				cache.delete(key);

				Ok(None)
			},
			None => Ok(None),
		}
	}

	/// Delete the entry for `key`, or every entry when `key` is `None`.
	pub async fn clear_cache(&self, key: Option<&str>) -> Result<()> {
		self.ensure_live()?;

		let mut cache = self.inner.cache.write().await;

		match key {
			Some(key) => {
				cache.delete(key);
			},
			None => cache.clear(),
		}

		Ok(())
	}

	/// Run the expiry-and-LRU sweep the periodic scheduler runs.
	pub async fn trigger_cleanup(&self) -> Result<()> {
		self.ensure_live()?;
		self.inner.run_cleanup().await;

		Ok(())
	}

	/// Point-in-time operational counters.
	pub async fn stats(&self) -> Result<Stats> {
		self.ensure_live()?;

		let active_fetchers = self.inner.fetchers.read().await.len();
		let inflight_requests = self.inner.inflight.lock().await.len();
		let now = self.inner.clock.now();
		let cache = self.inner.cache.read().await;
		let expired_entry_count =
			cache.entries().iter().filter(|(_, entry)| entry.is_expired(now)).count();

		Ok(Stats {
			active_fetchers,
			inflight_requests,
			cache_size: cache.len(),
			max_cache_size: cache.max_size(),
			expired_entry_count,
			last_cleanup_at: *self
				.inner
				.last_cleanup
				.lock()
				.unwrap_or_else(PoisonError::into_inner),
		})
	}

	/// Subscribe `observer` to the lifecycle events of `key`, creating the
	/// key's fetcher when necessary.
	pub async fn subscribe(&self, key: &str, observer: Arc<dyn Observer>) -> Result<()> {
		let fetcher = self.fetcher(key).await?;

		fetcher.bus().subscribe(observer);

		Ok(())
	}

	/// Remove the first matching subscription of `observer` on `key`;
	/// unknown keys and absent observers are no-ops.
	pub async fn unsubscribe(&self, key: &str, observer: &Arc<dyn Observer>) -> Result<()> {
		self.ensure_live()?;

		let fetchers = self.inner.fetchers.read().await;

		if let Some(fetcher) = fetchers.get(key) {
			fetcher.bus().unsubscribe(observer);
		}

		Ok(())
	}

	/// Replace the fetcher for `key` with one bound to `policy`, preserving
	/// the shared cache and the key's subscribers.
	pub async fn set_retry_policy(&self, key: &str, policy: RetryPolicy) -> Result<()> {
		self.ensure_live()?;
		policy.validate()?;

		let previous = { self.inner.fetchers.read().await.get(key).cloned() };
		let options = FetchOptions {
			url: previous.as_ref().map(|fetcher| fetcher.url().clone()),
			retry_policy: Some(policy),
			..Default::default()
		};
		let bus = previous.map(|fetcher| fetcher.bus().clone());
		let fetcher = Arc::new(self.build_fetcher(key, &options, bus)?);

		self.inner.fetchers.write().await.insert(CacheKey::from(key), fetcher);

		Ok(())
	}

	/// Cancel in-flight work and the cleanup scheduler, then clear all state.
	///
	/// Pending fetches resolve with [`Error::Cancelled`] for every joined
	/// waiter. The coordinator is unusable afterwards; subsequent operations
	/// fail. Repeated calls are no-ops.
	pub async fn shutdown(&self) {
		if self.inner.shut_down.swap(true, Ordering::SeqCst) {
			return;
		}

		self.inner.cancel.cancel();

		if let Some(handle) =
			self.inner.cleanup_task.lock().unwrap_or_else(PoisonError::into_inner).take()
		{
			handle.abort();
		}

		self.inner.fetchers.write().await.clear();
		self.inner.inflight.lock().await.clear();
		self.inner.cache.write().await.clear();

		tracing::debug!("coordinator shut down");
	}
}

#[derive(Debug)]
struct Inner<S: CacheStore> {
	config: Config,
	default_expiration: Duration,
	cache: Arc<RwLock<S>>,
	client: Client,
	provider: Option<Arc<dyn NetworkProvider>>,
	clock: Arc<dyn Clock>,
	fetchers: RwLock<HashMap<CacheKey, Arc<Fetcher<S>>>>,
	inflight: Mutex<HashMap<CacheKey, watch::Receiver<Option<Result<Payload>>>>>,
	cancel: CancellationToken,
	shut_down: AtomicBool,
	last_cleanup: StdMutex<Option<DateTime<Utc>>>,
	cleanup_task: StdMutex<Option<JoinHandle<()>>>,
}
impl<S: CacheStore> Inner<S> {
	async fn run_cleanup(&self) {
		let now = self.clock.now();
		let (expired, evicted) = {
			let mut cache = self.cache.write().await;

			(cache.clean_expired(now), cache.evict_lru())
		};

		if !expired.is_empty() || !evicted.is_empty() {
			tracing::debug!(expired = expired.len(), evicted = evicted.len(), "cleanup pass");
		}

		*self.last_cleanup.lock().unwrap_or_else(PoisonError::into_inner) = Some(now);
	}
}
