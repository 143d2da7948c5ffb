//! End to end flows through the client facade, with a scripted transport standing in for the
//! remote server.
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rust_decimal::Decimal;
use serde_json::json;

use flagstream::http::{HttpRequest, HttpResponse, LineStream, Transport};
use flagstream::{
    CacheConfig, ConnectionInfo, Error, ErrorStrategy, FeatureRequest, FlagClient, Result,
    SpecificFeatureRequest,
};

struct FakeTransport {
    responses: Mutex<VecDeque<Result<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
    streams: Mutex<VecDeque<Vec<String>>>,
    streams_opened: AtomicUsize,
}

impl FakeTransport {
    fn new() -> Arc<FakeTransport> {
        Arc::new(FakeTransport {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            streams: Mutex::new(VecDeque::new()),
            streams_opened: AtomicUsize::new(0),
        })
    }

    fn enqueue_body(&self, body: serde_json::Value) {
        self.responses.lock().unwrap().push_back(Ok(HttpResponse {
            status: 200,
            body: body.to_string(),
        }));
    }

    fn enqueue_error(&self, error: Error) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    fn enqueue_stream(&self, lines: Vec<String>) {
        self.streams.lock().unwrap().push_back(lines);
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(Error::Status(500)))
    }

    async fn open_stream(&self, _request: HttpRequest) -> Result<LineStream> {
        self.streams_opened.fetch_add(1, Ordering::SeqCst);
        let Some(lines) = self.streams.lock().unwrap().pop_front() else {
            return Err(Error::Status(503));
        };
        let stream =
            futures::stream::iter(lines.into_iter().map(Ok)).chain(futures::stream::pending());
        Ok(Box::pin(stream))
    }
}

fn boolean_feature(id: &str, active: bool) -> serde_json::Value {
    json!({
        "name": id,
        "project": "test",
        "active": active,
        "conditions": { "": { "enabled": active, "conditions": [] } }
    })
}

fn script_feature(id: &str, active: bool) -> serde_json::Value {
    json!({
        "name": id,
        "project": "test",
        "active": active,
        "conditions": { "": { "enabled": true, "wasmConfig": { "name": "remote-script" } } }
    })
}

fn snapshot_stream(payload: serde_json::Value) -> Vec<String> {
    let data = json!({ "type": "FEATURE_STATES", "payload": payload });
    vec![
        "event: FEATURE_STATES".to_owned(),
        format!("data: {data}"),
        String::new(),
    ]
}

fn poll_client(transport: Arc<FakeTransport>, cache: CacheConfig) -> FlagClient {
    FlagClient::builder(ConnectionInfo::new("http://server/api", "id", "secret"))
        .with_cache(cache)
        .with_transport(transport)
        .build()
}

fn push_client(transport: Arc<FakeTransport>) -> FlagClient {
    poll_client(
        transport,
        CacheConfig::new().enabled(true).use_server_sent_events(true),
    )
}

#[tokio::test]
async fn second_query_is_served_from_the_cache() {
    let transport = FakeTransport::new();
    transport.enqueue_body(json!({ "f": boolean_feature("f", true) }));
    let client = poll_client(Arc::clone(&transport), CacheConfig::new().enabled(true));

    let request = FeatureRequest::new().with_user("alice");
    assert_eq!(client.boolean_value("f", request.clone()).await.unwrap(), Some(true));
    assert_eq!(transport.request_count(), 1);

    assert_eq!(client.boolean_value("f", request).await.unwrap(), Some(true));
    assert_eq!(transport.request_count(), 1);
    client.close();
}

#[tokio::test]
async fn disabled_cache_fetches_every_time() {
    let transport = FakeTransport::new();
    transport.enqueue_body(json!({ "f": boolean_feature("f", true) }));
    transport.enqueue_body(json!({ "f": boolean_feature("f", false) }));
    let client = poll_client(Arc::clone(&transport), CacheConfig::new());

    let request = FeatureRequest::new().with_user("alice");
    assert_eq!(client.boolean_value("f", request.clone()).await.unwrap(), Some(true));
    assert_eq!(client.boolean_value("f", request).await.unwrap(), Some(false));
    assert_eq!(transport.request_count(), 2);
    client.close();
}

#[tokio::test]
async fn cache_bypass_overrides_compose_per_feature() {
    let transport = FakeTransport::new();
    transport.enqueue_body(json!({ "f": boolean_feature("f", true) }));
    transport.enqueue_body(json!({ "f": boolean_feature("f", false) }));
    let client = poll_client(Arc::clone(&transport), CacheConfig::new().enabled(true));

    // Query-level bypass forces a fetch even with the cache enabled.
    let bypass = FeatureRequest::new().with_user("u").ignore_cache(true);
    client.boolean_value("f", bypass.clone()).await.unwrap();
    client.boolean_value("f", bypass.clone()).await.unwrap();
    assert_eq!(transport.request_count(), 2);

    // A per-feature override wins over the query-level bypass.
    let pinned = FeatureRequest::new()
        .with_user("u")
        .ignore_cache(true)
        .with_specific_feature(SpecificFeatureRequest::feature("f").ignore_cache(false));
    assert_eq!(client.boolean_value("f", pinned).await.unwrap(), Some(false));
    assert_eq!(transport.request_count(), 2);
    client.close();
}

#[tokio::test]
async fn error_strategies_resolve_feature_then_query_then_client() {
    let transport = FakeTransport::new();
    // Every remote call fails.
    let client = FlagClient::builder(ConnectionInfo::new("http://server/api", "id", "secret"))
        .with_error_strategy(ErrorStrategy::null_value())
        .with_transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .build();

    let results = client
        .feature_values(
            FeatureRequest::new()
                .with_user("u")
                .with_error_strategy(ErrorStrategy::fail())
                .with_specific_feature(SpecificFeatureRequest::feature("f").with_error_strategy(
                    ErrorStrategy::default_value(true, "fallback", Decimal::ZERO),
                ))
                .with_feature("g"),
        )
        .await;

    // Per-feature default-value strategy for `f`, query-level fail for `g`.
    assert_eq!(results.boolean("f").await.unwrap(), Some(true));
    assert!(matches!(results.boolean("g").await, Err(Error::StrategyFailed(_))));

    // Client-level strategy when nothing overrides it.
    let results = client
        .feature_values(FeatureRequest::new().with_user("u").with_feature("h"))
        .await;
    assert_eq!(results.boolean("h").await.unwrap(), None);
    client.close();
}

#[tokio::test]
async fn one_failing_feature_does_not_poison_the_others() {
    let transport = FakeTransport::new();
    // The server answers but the response only knows about `ok`.
    transport.enqueue_body(json!({ "ok": boolean_feature("ok", true) }));
    let client = poll_client(Arc::clone(&transport), CacheConfig::new());

    let results = client
        .feature_values(
            FeatureRequest::new()
                .with_user("u")
                .with_error_strategy(ErrorStrategy::fail())
                .with_features(["ok", "gone"]),
        )
        .await;

    assert_eq!(results.boolean("ok").await.unwrap(), Some(true));
    assert!(matches!(results.boolean("gone").await, Err(Error::StrategyFailed(_))));
    client.close();
}

#[tokio::test]
async fn default_value_strategy_covers_every_value_type() {
    let transport = FakeTransport::new();
    let client = FlagClient::builder(ConnectionInfo::new("http://server/api", "id", "secret"))
        .with_error_strategy(ErrorStrategy::default_value(
            true,
            "fallback",
            Decimal::from_str("2.5").unwrap(),
        ))
        .with_transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .build();

    let request = FeatureRequest::new().with_user("u");
    assert_eq!(client.boolean_value("f", request.clone()).await.unwrap(), Some(true));
    assert_eq!(
        client.string_value("f", request.clone()).await.unwrap(),
        Some("fallback".to_owned())
    );
    assert_eq!(
        client.number_value("f", request).await.unwrap(),
        Some(Decimal::from_str("2.5").unwrap())
    );
    client.close();
}

#[tokio::test]
async fn last_known_value_is_served_when_the_strategy_allows_it() {
    let transport = FakeTransport::new();
    transport.enqueue_body(json!({ "f": boolean_feature("f", true) }));
    let client = poll_client(Arc::clone(&transport), CacheConfig::new().enabled(true));

    let warmup = FeatureRequest::new().with_user("u");
    assert_eq!(client.boolean_value("f", warmup).await.unwrap(), Some(true));

    // Force a remote call that fails; by default the cached value backs the error strategy.
    transport.enqueue_error(Error::Timeout(Duration::from_secs(1)));
    let with_fallback = FeatureRequest::new()
        .with_user("u")
        .ignore_cache(true)
        .with_error_strategy(ErrorStrategy::fail());
    assert_eq!(client.boolean_value("f", with_fallback).await.unwrap(), Some(true));

    transport.enqueue_error(Error::Timeout(Duration::from_secs(1)));
    let without_fallback = FeatureRequest::new()
        .with_user("u")
        .ignore_cache(true)
        .with_error_strategy(ErrorStrategy::fail().with_last_known_fallback(false));
    assert!(matches!(
        client.boolean_value("f", without_fallback).await,
        Err(Error::StrategyFailed(_))
    ));
    client.close();
}

#[tokio::test]
async fn background_refresh_failure_keeps_the_cached_state() {
    let transport = FakeTransport::new();
    transport.enqueue_body(json!({ "f": boolean_feature("f", true) }));
    // Any refresh attempt after this will hit an empty queue and fail with a 500.
    let client = poll_client(
        Arc::clone(&transport),
        CacheConfig::new()
            .enabled(true)
            .with_refresh_interval(Duration::from_millis(20)),
    );

    let request = FeatureRequest::new().with_user("u");
    assert_eq!(client.boolean_value("f", request.clone()).await.unwrap(), Some(true));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(transport.request_count() > 1, "the refresh task should have polled");
    assert_eq!(client.boolean_value("f", request).await.unwrap(), Some(true));
    client.close();
}

#[tokio::test]
async fn background_refresh_picks_up_new_values() {
    let transport = FakeTransport::new();
    transport.enqueue_body(json!({ "f": boolean_feature("f", true) }));
    transport.enqueue_body(json!({ "f": boolean_feature("f", false) }));
    let client = poll_client(
        Arc::clone(&transport),
        CacheConfig::new()
            .enabled(true)
            .with_refresh_interval(Duration::from_millis(20)),
    );

    let request = FeatureRequest::new().with_user("u");
    assert_eq!(client.boolean_value("f", request.clone()).await.unwrap(), Some(true));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(client.boolean_value("f", request).await.unwrap(), Some(false));
    client.close();
}

#[tokio::test]
async fn push_mode_subscribes_once_and_serves_from_the_cache() {
    let transport = FakeTransport::new();
    transport.enqueue_stream(snapshot_stream(json!({ "f": boolean_feature("f", true) })));
    let client = push_client(Arc::clone(&transport));

    let request = FeatureRequest::new().with_user("u");
    assert_eq!(client.boolean_value("f", request.clone()).await.unwrap(), Some(true));
    assert_eq!(transport.streams_opened.load(Ordering::SeqCst), 1);

    // Still in scope: answered from the cache, no reconnection.
    assert_eq!(client.boolean_value("f", request).await.unwrap(), Some(true));
    assert_eq!(transport.streams_opened.load(Ordering::SeqCst), 1);
    assert_eq!(transport.request_count(), 0, "push mode never polls");
    client.close();
}

#[tokio::test]
async fn querying_outside_the_scope_rescopes_the_subscription() {
    let transport = FakeTransport::new();
    transport.enqueue_stream(snapshot_stream(json!({ "f": boolean_feature("f", true) })));
    transport.enqueue_stream(snapshot_stream(json!({
        "f": boolean_feature("f", true),
        "g": boolean_feature("g", false),
    })));
    let client = push_client(Arc::clone(&transport));

    let request = FeatureRequest::new().with_user("u");
    assert_eq!(client.boolean_value("f", request.clone()).await.unwrap(), Some(true));
    assert_eq!(client.boolean_value("g", request.clone()).await.unwrap(), Some(false));
    assert_eq!(transport.streams_opened.load(Ordering::SeqCst), 2);

    // The widened scope still covers the first feature.
    assert_eq!(client.boolean_value("f", request).await.unwrap(), Some(true));
    assert_eq!(transport.streams_opened.load(Ordering::SeqCst), 2);
    client.close();
}

#[tokio::test]
async fn subscribed_features_missing_from_the_snapshot_are_not_found() {
    let transport = FakeTransport::new();
    transport.enqueue_stream(snapshot_stream(json!({ "f": boolean_feature("f", true) })));
    let client = push_client(Arc::clone(&transport));

    let results = client
        .feature_values(
            FeatureRequest::new()
                .with_user("u")
                .with_error_strategy(ErrorStrategy::fail())
                .with_features(["f", "ghost"]),
        )
        .await;
    assert_eq!(results.boolean("f").await.unwrap(), Some(true));
    assert!(matches!(results.boolean("ghost").await, Err(Error::StrategyFailed(_))));
    client.close();
}

#[tokio::test]
async fn script_backed_features_are_validated_remotely() {
    let transport = FakeTransport::new();
    transport.enqueue_stream(snapshot_stream(json!({ "s": script_feature("s", true) })));
    transport.enqueue_body(json!({ "s": script_feature("s", false) }));
    transport.enqueue_body(json!({ "s": script_feature("s", true) }));
    let client = push_client(Arc::clone(&transport));

    // The first query is answered by the subscription snapshot itself.
    let request = FeatureRequest::new().with_user("u");
    assert_eq!(client.boolean_value("s", request.clone()).await.unwrap(), Some(true));
    assert_eq!(transport.request_count(), 0);

    // The snapshot marks `s` as script backed; later reads go to the batch endpoint.
    assert_eq!(client.boolean_value("s", request.clone()).await.unwrap(), Some(false));
    assert_eq!(client.boolean_value("s", request).await.unwrap(), Some(true));
    assert_eq!(transport.request_count(), 2);
    assert_eq!(transport.streams_opened.load(Ordering::SeqCst), 1);
    client.close();
}

#[tokio::test]
async fn preloaded_features_are_fetched_before_wait_until_loaded_returns() {
    let transport = FakeTransport::new();
    transport.enqueue_body(json!({ "f": boolean_feature("f", true) }));
    let client = FlagClient::builder(ConnectionInfo::new("http://server/api", "id", "secret"))
        .with_cache(CacheConfig::new().enabled(true))
        .with_transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .preload(["f"])
        .build();

    client.wait_until_loaded().await;
    assert_eq!(transport.request_count(), 1);

    // Already cached, no further remote call.
    let request = FeatureRequest::new().with_user("u");
    assert_eq!(client.boolean_value("f", request).await.unwrap(), Some(true));
    assert_eq!(transport.request_count(), 1);
    client.close();
}
