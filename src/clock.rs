//! Wall-clock abstraction so planning stays testable at fixed timestamps.

// std
use std::fmt::Debug;
// crates.io
use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Debug + Send + Sync {
	/// Current timestamp.
	fn now(&self) -> DateTime<Utc>;
}

/// Default clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}
