//! Lifecycle events and synchronous observer fan-out.

// std
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	sync::{Mutex, PoisonError},
};
// crates.io
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::entry::{CacheKey, Payload},
};

/// Lifecycle event emitted while satisfying a fetch.
///
/// A pure cache hit emits nothing; events only accompany network activity.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
	/// A network attempt is about to be made for `cache_key`.
	LoadingStart {
		/// Request URL about to be fetched.
		url: Url,
		/// Cache key the request resolves.
		cache_key: CacheKey,
	},
	/// Fresh data is about to be returned to the caller.
	Success {
		/// Payload being returned.
		payload: Payload,
	},
	/// A fetch ultimately failed after exhausting its attempt budget.
	Error {
		/// Final error surfaced to the caller.
		error: Error,
	},
}

/// Receiver of lifecycle events.
///
/// A failing observer never affects other observers or the fetch outcome;
/// the bus logs and discards the failure.
pub trait Observer: Send + Sync {
	/// Handle one event.
	fn update(&self, event: &Event) -> Result<()>;
}

/// Insertion-ordered observer registry with synchronous fan-out.
///
/// `notify` walks a snapshot of the subscriber list, so subscribing or
/// unsubscribing from inside an observer never changes the set of observers
/// called by the in-progress notification.
#[derive(Default)]
pub struct EventBus {
	observers: Mutex<Vec<Arc<dyn Observer>>>,
}
impl EventBus {
	/// Create a bus with no subscribers.
	pub fn new() -> Self {
		Self::default()
	}

	/// Append `observer` to the subscriber list. Duplicates are permitted.
	pub fn subscribe(&self, observer: Arc<dyn Observer>) {
		self.observers().push(observer);
	}

	/// Remove the first occurrence of `observer`; absence is a no-op.
	pub fn unsubscribe(&self, observer: &Arc<dyn Observer>) {
		let mut observers = self.observers();

		if let Some(position) = observers.iter().position(|o| Arc::ptr_eq(o, observer)) {
			observers.remove(position);
		}
	}

	/// Invoke every current subscriber with `event`, in subscription order.
	pub fn notify(&self, event: &Event) {
		let snapshot = self.observers().clone();

		for observer in snapshot {
			if let Err(error) = observer.update(event) {
				tracing::warn!(error = %error, "observer failed; continuing fan-out");
			}
		}
	}

	/// Number of current subscribers.
	pub fn subscriber_count(&self) -> usize {
		self.observers().len()
	}

	/// Remove every subscriber.
	pub fn clear(&self) {
		self.observers().clear();
	}

	fn observers(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn Observer>>> {
		self.observers.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
impl Debug for EventBus {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("EventBus").field("subscribers", &self.subscriber_count()).finish()
	}
}
