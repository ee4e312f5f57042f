//! Coordinated async HTTP/JSON fetching with an LRU cache, request
//! deduplication, and retry with exponential backoff — planning and effect
//! application kept strictly apart.
//!
//! The engine satisfies each request either from the in-memory cache (fresh
//! hit), by joining an in-flight request for the same key (deduplication), or
//! by issuing a new HTTP request with bounded retries. A [`Fetcher`] first
//! computes a frozen [`FetchPlan`] from an immutable cache snapshot and a
//! timestamp, then applies the planned mutations and events to live state.
//! The [`Coordinator`] orchestrates fetchers across keys over one shared
//! cache.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod coordinator;
pub mod events;
pub mod fetch;
pub mod http;

mod clock;
mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};

	pub use crate::{Error, Result};
}
pub use crate::{
	cache::{
		entry::{CacheEntry, CacheKey, Payload},
		store::{CacheStore, MemoryCache},
	},
	clock::{Clock, SystemClock},
	coordinator::{Config, Coordinator, CoordinatorBuilder, FetchOptions, Stats},
	error::{Error, Result},
	events::{Event, EventBus, Observer},
	fetch::{
		fetcher::Fetcher,
		plan::{CacheOperation, FetchPlan, PlanMeta},
	},
	http::{
		client::{HttpProvider, NetworkProvider, ProviderFuture},
		retry::RetryPolicy,
	},
};
