//! Integration coverage for batch fetching, stats, cleanup, and shutdown.

// std
use std::time::Duration;
// crates.io
use fetch_cache::{Config, Coordinator, Error, Result, RetryPolicy};
use serde_json::json;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

#[tokio::test]
async fn batch_fetching_reports_outcomes_per_key() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/good.json"))
		.respond_with(ResponseTemplate::new(200).set_body_string(r#"{ "p": 1 }"#))
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/bad.json"))
		.respond_with(ResponseTemplate::new(404))
		.mount(&server)
		.await;

	let coordinator = Coordinator::builder()
		.retry_policy(RetryPolicy { max_attempts: 1, ..RetryPolicy::default() })
		.build()?;
	let good = format!("{}/good.json", server.uri());
	let bad = format!("{}/bad.json", server.uri());
	let outcomes = coordinator.fetch_many([&good, &bad]).await;

	assert_eq!(outcomes.len(), 2);
	assert_eq!(**outcomes[0].as_ref().expect("good key"), json!({ "p": 1 }));
	assert!(matches!(outcomes[1], Err(Error::HttpStatus { .. })));

	coordinator.shutdown().await;

	Ok(())
}

#[tokio::test]
async fn stats_track_fetchers_cache_and_cleanup() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/data.json"))
		.respond_with(ResponseTemplate::new(200).set_body_string(r#"{ "p": 1 }"#))
		.mount(&server)
		.await;

	let coordinator = Coordinator::builder()
		// Entries are born expired so the cleanup sweep has work to do.
		.default_expiration(Duration::ZERO)
		.max_cache_size(5)
		.build()?;
	let key = format!("{}/data.json", server.uri());

	let before = coordinator.stats().await?;

	assert_eq!(before.active_fetchers, 0);
	assert_eq!(before.cache_size, 0);
	assert_eq!(before.max_cache_size, 5);

	coordinator.fetch(&key).await?;

	let after_fetch = coordinator.stats().await?;

	assert_eq!(after_fetch.active_fetchers, 1);
	assert_eq!(after_fetch.cache_size, 1);
	assert_eq!(after_fetch.expired_entry_count, 1);

	coordinator.trigger_cleanup().await?;

	let after_cleanup = coordinator.stats().await?;

	assert_eq!(after_cleanup.cache_size, 0);
	assert_eq!(after_cleanup.expired_entry_count, 0);
	assert!(after_cleanup.last_cleanup_at.is_some());

	coordinator.shutdown().await;

	Ok(())
}

#[tokio::test]
async fn the_cache_bound_holds_across_many_keys() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	for index in 0..4 {
		Mock::given(method("GET"))
			.and(path(format!("/item-{index}.json")))
			.respond_with(
				ResponseTemplate::new(200).set_body_string(format!(r#"{{ "p": {index} }}"#)),
			)
			.mount(&server)
			.await;
	}

	let coordinator = Coordinator::builder().max_cache_size(2).build()?;

	for index in 0..4 {
		coordinator.fetch(&format!("{}/item-{index}.json", server.uri())).await?;
	}

	let stats = coordinator.stats().await?;

	assert_eq!(stats.cache_size, 2);
	assert_eq!(stats.active_fetchers, 4);

	// The oldest entries were evicted; the newest two remain.
	assert!(
		coordinator.cached_value(&format!("{}/item-3.json", server.uri())).await?.is_some()
	);
	assert!(
		coordinator.cached_value(&format!("{}/item-0.json", server.uri())).await?.is_none()
	);

	coordinator.shutdown().await;

	Ok(())
}

#[tokio::test]
async fn replacing_the_retry_policy_takes_effect_for_later_fetches() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/down.json"))
		.respond_with(ResponseTemplate::new(503))
		.expect(1)
		.mount(&server)
		.await;

	let coordinator = Coordinator::new(Config::default())?;
	let key = format!("{}/down.json", server.uri());

	// A single-attempt policy replaces the default three-attempt one before
	// any request is made for the key.
	coordinator
		.set_retry_policy(&key, RetryPolicy { max_attempts: 1, ..RetryPolicy::default() })
		.await?;

	assert!(matches!(coordinator.fetch(&key).await, Err(Error::HttpStatus { .. })));

	server.verify().await;
	coordinator.shutdown().await;

	Ok(())
}

#[tokio::test]
async fn shutdown_cancels_in_flight_fetches() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/slow.json"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string(r#"{ "p": 1 }"#)
				.set_delay(Duration::from_secs(5)),
		)
		.mount(&server)
		.await;

	let coordinator = Coordinator::new(Config::default())?;
	let key = format!("{}/slow.json", server.uri());
	let pending = tokio::spawn({
		let coordinator = coordinator.clone();
		let key = key.clone();

		async move { coordinator.fetch(&key).await }
	});

	tokio::time::sleep(Duration::from_millis(100)).await;
	coordinator.shutdown().await;

	let outcome = pending.await.expect("task completes");

	assert_eq!(outcome, Err(Error::Cancelled));
	assert_eq!(coordinator.fetch(&key).await, Err(Error::Cancelled));

	Ok(())
}
