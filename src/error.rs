//! Crate-wide error types and `Result` alias.

// crates.io
use http::StatusCode;
use url::Url;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the fetch-cache crate.
///
/// Variants map one-to-one onto the failure taxonomy the retry loop
/// classifies against: transport and timeout failures are retryable, HTTP
/// statuses are retryable only when the policy lists them, and everything
/// else is fatal. The enum is `Clone`/`PartialEq` so a single error value can
/// fan out to every waiter joined on a deduplicated request and be embedded
/// in [`Event::Error`](crate::events::Event).
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	#[error("Transport failure for {url}: {message}")]
	Transport { url: Url, message: String },
	#[error("Attempt timed out for {url}.")]
	Timeout { url: Url },
	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: StatusCode, url: Url, body: Option<String> },
	#[error("Undecodable response body from {url}: {message}")]
	Decode { url: Url, message: String },
	#[error("Operation cancelled.")]
	Cancelled,
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl From<url::ParseError> for Error {
	fn from(value: url::ParseError) -> Self {
		Self::Validation { field: "url", reason: value.to_string() }
	}
}
