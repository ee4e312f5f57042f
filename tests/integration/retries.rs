//! Integration coverage for retry, backoff, and failure classification.

// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use fetch_cache::{Coordinator, Error, Result, RetryPolicy};
use serde_json::json;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

fn fast_policy(max_attempts: u32) -> RetryPolicy {
	RetryPolicy {
		max_attempts,
		initial_delay: Duration::from_millis(10),
		multiplier: 2.0,
		jitter_fraction: 0.0,
		..RetryPolicy::default()
	}
}

#[tokio::test]
async fn retryable_statuses_are_retried_until_success() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let counter = Arc::new(AtomicUsize::new(0));
	let counter_handle = counter.clone();

	Mock::given(method("GET"))
		.and(path("/flaky.json"))
		.respond_with(move |_: &wiremock::Request| {
			match counter_handle.fetch_add(1, Ordering::SeqCst) {
				0 | 1 => ResponseTemplate::new(500),
				_ => ResponseTemplate::new(200).set_body_string(r#"{ "p": 1 }"#),
			}
		})
		.expect(3)
		.mount(&server)
		.await;

	let coordinator = Coordinator::builder()
		.retry_policy(fast_policy(3))
		.min_backoff(Duration::from_millis(1))
		.build()?;
	let key = format!("{}/flaky.json", server.uri());
	let payload = coordinator.fetch(&key).await?;

	assert_eq!(*payload, json!({ "p": 1 }));
	assert_eq!(counter.load(Ordering::SeqCst), 3);

	server.verify().await;
	coordinator.shutdown().await;

	Ok(())
}

#[tokio::test]
async fn a_single_attempt_budget_surfaces_the_first_failure() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/down.json"))
		.respond_with(ResponseTemplate::new(503))
		.expect(1)
		.mount(&server)
		.await;

	let coordinator = Coordinator::builder()
		.retry_policy(fast_policy(1))
		.min_backoff(Duration::from_millis(1))
		.build()?;
	let key = format!("{}/down.json", server.uri());

	match coordinator.fetch(&key).await {
		Err(Error::HttpStatus { status, .. }) => assert_eq!(status.as_u16(), 503),
		other => panic!("expected an HTTP status failure, got {other:?}"),
	}

	server.verify().await;
	coordinator.shutdown().await;

	Ok(())
}

#[tokio::test]
async fn fatal_statuses_are_never_retried() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/missing.json"))
		.respond_with(ResponseTemplate::new(404))
		.expect(1)
		.mount(&server)
		.await;

	let coordinator = Coordinator::builder()
		.retry_policy(fast_policy(3))
		.min_backoff(Duration::from_millis(1))
		.build()?;
	let key = format!("{}/missing.json", server.uri());

	match coordinator.fetch(&key).await {
		Err(Error::HttpStatus { status, .. }) => assert_eq!(status.as_u16(), 404),
		other => panic!("expected an HTTP status failure, got {other:?}"),
	}

	server.verify().await;
	coordinator.shutdown().await;

	Ok(())
}

#[tokio::test]
async fn undecodable_bodies_fail_without_retrying() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/garbled.json"))
		.respond_with(ResponseTemplate::new(200).set_body_string("definitely not json"))
		.expect(1)
		.mount(&server)
		.await;

	let coordinator = Coordinator::builder()
		.retry_policy(fast_policy(3))
		.min_backoff(Duration::from_millis(1))
		.build()?;
	let key = format!("{}/garbled.json", server.uri());

	assert!(matches!(coordinator.fetch(&key).await, Err(Error::Decode { .. })));

	server.verify().await;
	coordinator.shutdown().await;

	Ok(())
}

#[tokio::test]
async fn a_per_attempt_timeout_is_retried_like_a_transport_failure() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let counter = Arc::new(AtomicUsize::new(0));
	let counter_handle = counter.clone();

	Mock::given(method("GET"))
		.and(path("/slow.json"))
		.respond_with(move |_: &wiremock::Request| {
			if counter_handle.fetch_add(1, Ordering::SeqCst) == 0 {
				ResponseTemplate::new(200)
					.set_body_string(r#"{ "p": 1 }"#)
					.set_delay(Duration::from_millis(500))
			} else {
				ResponseTemplate::new(200).set_body_string(r#"{ "p": 1 }"#)
			}
		})
		.expect(2)
		.mount(&server)
		.await;

	let coordinator = Coordinator::builder()
		.retry_policy(fast_policy(3))
		.per_attempt_timeout(Duration::from_millis(100))
		.min_backoff(Duration::from_millis(1))
		.build()?;
	let key = format!("{}/slow.json", server.uri());
	let payload = coordinator.fetch(&key).await?;

	assert_eq!(*payload, json!({ "p": 1 }));
	assert_eq!(counter.load(Ordering::SeqCst), 2);

	coordinator.shutdown().await;

	Ok(())
}
