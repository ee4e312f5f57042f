//! Network providers: the transport contract and the retrying HTTP default.

// std
use std::{fmt::Debug, future::Future, pin::Pin};
// crates.io
use reqwest::Client;
use serde_json::Value;
use tokio::time;
use tokio_util::sync::CancellationToken;
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::entry::Payload,
	http::retry::{RetryExecutor, RetryPolicy},
};

/// Boxed future returned by [`NetworkProvider::fetch`].
pub type ProviderFuture<'a> = Pin<Box<dyn Future<Output = Result<Payload>> + Send + 'a>>;

/// Transport contract: given a URL and a cancellation signal, produce a
/// decoded JSON payload or fail.
///
/// The default implementation is [`HttpProvider`]. A custom provider owns its
/// whole attempt sequence (the engine retries only inside the default one)
/// and must return promptly with [`Error::Cancelled`] once `cancel` fires.
pub trait NetworkProvider: Debug + Send + Sync {
	/// Fetch and decode the resource at `url`.
	fn fetch<'a>(&'a self, url: &'a Url, cancel: &'a CancellationToken) -> ProviderFuture<'a>;
}

/// Default provider: reqwest transport with bounded retries and exponential
/// backoff.
///
/// Each attempt carries its own timeout. Failures are classified through
/// [`RetryPolicy::is_retryable`]; backoff waits are raced against the
/// cancellation signal so a shutdown never sits out a sleep.
#[derive(Clone, Debug)]
pub struct HttpProvider {
	client: Client,
	policy: RetryPolicy,
	attempt_timeout: Duration,
	min_backoff: Duration,
}
impl HttpProvider {
	/// Build a provider over a shared client and retry configuration.
	pub fn new(
		client: Client,
		policy: RetryPolicy,
		attempt_timeout: Duration,
		min_backoff: Duration,
	) -> Self {
		Self { client, policy, attempt_timeout, min_backoff }
	}

	/// Build the default reqwest client for JSON endpoints.
	pub fn default_client() -> Result<Client> {
		Client::builder()
			.user_agent(format!("fetch-cache/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()
			.map_err(|err| Error::Validation { field: "http_client", reason: err.to_string() })
	}

	async fn attempt(&self, url: &Url) -> Result<Payload> {
		let response = self
			.client
			.get(url.clone())
			.timeout(self.attempt_timeout)
			.send()
			.await
			.map_err(|err| classify_transport(url, &err))?;
		let status = response.status();

		if !status.is_success() {
			let body = response.text().await.ok();

			return Err(Error::HttpStatus { status, url: url.clone(), body });
		}

		let bytes = response.bytes().await.map_err(|err| classify_transport(url, &err))?;
		let value = serde_json::from_slice::<Value>(&bytes)
			.map_err(|err| Error::Decode { url: url.clone(), message: err.to_string() })?;

		Ok(Arc::new(value))
	}
}
impl NetworkProvider for HttpProvider {
	fn fetch<'a>(&'a self, url: &'a Url, cancel: &'a CancellationToken) -> ProviderFuture<'a> {
		Box::pin(async move {
			let mut executor = RetryExecutor::new(&self.policy, self.min_backoff);

			loop {
				let outcome = tokio::select! {
					() = cancel.cancelled() => return Err(Error::Cancelled),
					outcome = self.attempt(url) => outcome,
				};

				match outcome {
					Ok(payload) => {
						tracing::debug!(%url, attempt = executor.attempt(), "fetch succeeded");

						return Ok(payload);
					},
					Err(error) => {
						if !self.policy.is_retryable(&error) {
							tracing::debug!(%url, error = %error, "fatal failure; not retrying");

							return Err(error);
						}

						let Some(delay) = executor.next_backoff() else {
							tracing::warn!(%url, error = %error, "attempt budget exhausted");

							return Err(error);
						};

						tokio::select! {
							() = cancel.cancelled() => return Err(Error::Cancelled),
							() = time::sleep(delay) => {},
						}
					},
				}
			}
		})
	}
}

fn classify_transport(url: &Url, error: &reqwest::Error) -> Error {
	if error.is_timeout() {
		Error::Timeout { url: url.clone() }
	} else if error.is_decode() {
		Error::Decode { url: url.clone(), message: error.to_string() }
	} else {
		Error::Transport { url: url.clone(), message: error.to_string() }
	}
}
