//! Integration tests using wiremock to simulate the Shopline API.

use serde::{Deserialize, Serialize};
use slshop::auth::{App, TokenEndpoint};
use slshop::query::{CountOptions, ListOptions};
use slshop::{
    CircuitRejection, CircuitState, Client, Error, Requester, Suspension, TokenManager,
    MAX_RESPONSE_BODY_SIZE,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Product {
    id: u64,
    title: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ProductEnvelope {
    product: Product,
}

fn product(id: u64, title: &str) -> ProductEnvelope {
    ProductEnvelope {
        product: Product {
            id,
            title: title.to_string(),
        },
    }
}

fn client_for(server: &MockServer) -> slshop::ClientBuilder {
    Client::builder()
        .handle("open001")
        .base_url(server.uri())
        .unwrap()
        .backoff_base(Duration::from_millis(10))
}

#[tokio::test]
async fn test_successful_get_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/admin/openapi/v20251201/products/1.json"))
        .and(header("accept", "application/json"))
        .and(header("content-type", "application/json; charset=utf-8"))
        .and(header("user-agent", slshop::USER_AGENT))
        .and(header("authorization", "Bearer static-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(product(1, "Linen shirt")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server)
        .access_token("static-token")
        .build()
        .unwrap();
    let path = client.create_path("products/1.json");

    let response = client
        .get::<ProductEnvelope>(&CancellationToken::new(), &path, None)
        .await
        .unwrap();

    assert_eq!(response.data, product(1, "Linen shirt"));
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 1);
    assert!(!response.was_retried());
}

#[tokio::test]
async fn test_successful_post_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/admin/openapi/v20251201/products/products.json"))
        .and(body_json(serde_json::json!({ "product": { "id": 0, "title": "New" } })))
        .respond_with(ResponseTemplate::new(201).set_body_json(product(42, "New")))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let path = client.create_path("products/products.json");

    let response = client
        .post::<_, ProductEnvelope>(&CancellationToken::new(), &path, &product(0, "New"))
        .await
        .unwrap();

    assert_eq!(response.data.product.id, 42);
    assert_eq!(response.status.as_u16(), 201);
}

#[tokio::test]
async fn test_missing_token_sends_no_authorization() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).access_token("").build().unwrap();
    client
        .get::<serde_json::Value>(&CancellationToken::new(), "/shop.json", None)
        .await
        .unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_query_options_are_appended() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/admin/openapi/v20251201/products/products.json"))
        .and(query_param("status", "active"))
        .and(query_param("limit", "5"))
        .and(query_param("since_id", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "products": [] })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let path = format!("{}?status=active", client.create_path("products/products.json"));
    let opts = ListOptions {
        limit: 5,
        since_id: 100,
        ..Default::default()
    };

    client
        .get::<serde_json::Value>(&CancellationToken::new(), &path, Some(&opts))
        .await
        .unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(
        requests[0].url.query(),
        Some("status=active&limit=5&since_id=100")
    );
}

#[tokio::test]
async fn test_api_error_is_parsed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
            "message": "Validation failed",
            "traceId": "0a1b2c",
            "errors": { "title": "can't be blank" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).max_retries(3).build().unwrap();
    let result = client
        .get::<serde_json::Value>(&CancellationToken::new(), "/products.json", None)
        .await;

    match result {
        Err(Error::Api(api)) => {
            assert_eq!(api.status.as_u16(), 422);
            assert_eq!(api.message.as_deref(), Some("Validation failed"));
            assert_eq!(api.trace_id.as_deref(), Some("0a1b2c"));
            assert_eq!(api.details(), "title: can't be blank");
        }
        other => panic!("Expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_deserialization_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("invalid json"))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let result = client
        .get::<ProductEnvelope>(&CancellationToken::new(), "/products/1.json", None)
        .await;

    match result {
        Err(Error::DeserializationFailed {
            raw_response,
            status,
            ..
        }) => {
            assert_eq!(raw_response, "invalid json");
            assert_eq!(status.as_u16(), 200);
        }
        other => panic!("Expected DeserializationFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_replays_identical_body() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("PUT"))
        .and(path("/admin/openapi/v20251201/products/7.json"))
        .respond_with(move |_req: &Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(503).set_body_string("maintenance")
            } else {
                ResponseTemplate::new(200).set_body_json(product(7, "Renamed"))
            }
        })
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).max_retries(2).build().unwrap();
    let path = client.create_path("products/7.json");

    let response = client
        .put::<_, ProductEnvelope>(&CancellationToken::new(), &path, &product(7, "Renamed"))
        .await
        .unwrap();

    assert_eq!(response.attempts, 2);
    assert!(response.was_retried());

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].body.is_empty());
    assert_eq!(requests[0].body, requests[1].body);

    let sent: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(sent, serde_json::json!({ "product": { "id": 7, "title": "Renamed" } }));
    for request in &requests {
        assert_eq!(
            request.headers.get("content-type").unwrap(),
            "application/json; charset=utf-8"
        );
    }
}

#[tokio::test]
async fn test_rate_limit_retry_after_zero_falls_back_to_backoff() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("GET"))
        .respond_with(move |_req: &Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(429).insert_header("retry-after", "0")
            } else {
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "ok" }))
            }
        })
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).max_retries(1).build().unwrap();
    let response = client
        .get::<serde_json::Value>(&CancellationToken::new(), "/status.json", None)
        .await
        .unwrap();

    assert_eq!(response.data["status"], "ok");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_rate_limit_honours_retry_after_seconds() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("GET"))
        .respond_with(move |_req: &Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "1")
                    .set_body_string("Rate limited")
            } else {
                ResponseTemplate::new(200).set_body_json(product(1, "Test"))
            }
        })
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).max_retries(3).build().unwrap();

    let start = Instant::now();
    let response = client
        .get::<ProductEnvelope>(&CancellationToken::new(), "/products/1.json", None)
        .await
        .unwrap();

    assert_eq!(response.attempts, 2);
    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_final_rate_limit_surfaces_retry_after() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_json(serde_json::json!({ "message": "Too many requests", "traceId": "t-429" })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let err = client
        .get::<serde_json::Value>(&CancellationToken::new(), "/orders.json", None)
        .await
        .unwrap_err();

    match &err {
        Error::RateLimited { retry_after, error } => {
            assert_eq!(*retry_after, Duration::from_secs(7));
            assert_eq!(error.message.as_deref(), Some("Too many requests"));
        }
        other => panic!("Expected RateLimited, got {:?}", other),
    }
    assert!(err.is_retryable());
    assert_eq!(err.trace_id(), Some("t-429"));
}

#[tokio::test]
async fn test_exhausted_retries_on_503() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).max_retries(2).build().unwrap();
    let err = client
        .get::<serde_json::Value>(&CancellationToken::new(), "/orders.json", None)
        .await
        .unwrap_err();

    match err {
        Error::ServiceUnavailable { retry_after, error } => {
            assert_eq!(retry_after, None);
            assert_eq!(error.raw_body, "unavailable");
        }
        other => panic!("Expected ServiceUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_network_error_counts_attempts() {
    let client = Client::builder()
        .base_url("http://127.0.0.1:1")
        .unwrap()
        .max_retries(2)
        .backoff_base(Duration::from_millis(1))
        .build()
        .unwrap();

    let err = client
        .get::<serde_json::Value>(&CancellationToken::new(), "/shop.json", None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Network { attempts: 3, .. }), "got {:?}", err);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_cancel_during_backoff_returns_promptly() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .max_retries(5)
        .backoff_base(Duration::from_secs(5))
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = client
        .get::<serde_json::Value>(&cancel, "/orders.json", None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled(Suspension::Backoff)), "got {:?}", err);
    assert!(start.elapsed() < Duration::from_secs(2));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancelled_before_send() {
    let mock_server = MockServer::start().await;
    let client = client_for(&mock_server).build().unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = client
        .get::<serde_json::Value>(&cancel, "/shop.json", None)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_body_is_truncated() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; 11 * 1024 * 1024]))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let result = tokio::time::timeout(
        Duration::from_secs(20),
        client.get::<serde_json::Value>(&CancellationToken::new(), "/huge.json", None),
    )
    .await
    .expect("bounded read should not hang");

    match result {
        Err(Error::DeserializationFailed { raw_response, .. }) => {
            assert_eq!(raw_response.len(), MAX_RESPONSE_BODY_SIZE);
        }
        other => panic!("Expected DeserializationFailed, got {:?}", other.map(|r| r.status)),
    }
}

#[tokio::test]
async fn test_circuit_breaker_rejects_without_network_io() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server)
        .circuit_breaker(2, Duration::from_secs(60))
        .build()
        .unwrap();
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        let err = client
            .get::<serde_json::Value>(&cancel, "/orders.json", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable { .. }));
    }

    let err = client
        .get::<serde_json::Value>(&cancel, "/orders.json", None)
        .await
        .unwrap_err();
    match &err {
        Error::CircuitOpen(CircuitRejection::Open { remaining }) => {
            assert!(*remaining <= Duration::from_secs(60));
        }
        other => panic!("Expected CircuitOpen, got {:?}", other),
    }
    assert!(err.retry_after().is_some());
    assert_eq!(
        client.circuit_breaker().unwrap().state(),
        CircuitState::Open
    );
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_circuit_breaker_stops_retry_loop() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server)
        .max_retries(5)
        .circuit_breaker(2, Duration::from_secs(60))
        .build()
        .unwrap();

    let err = client
        .get::<serde_json::Value>(&CancellationToken::new(), "/orders.json", None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::CircuitOpen(_)), "got {:?}", err);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_client_errors_do_not_trip_breaker() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({ "message": "Not Found" })))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server)
        .circuit_breaker(1, Duration::from_secs(60))
        .build()
        .unwrap();
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        let err = client
            .get::<serde_json::Value>(&cancel, "/products/404.json", None)
            .await
            .unwrap_err();
        assert_eq!(err.status().map(|s| s.as_u16()), Some(404));
    }
    assert_eq!(client.circuit_breaker().unwrap().state(), CircuitState::Closed);
}

async fn mount_token_endpoint(server: &MockServer, code: i64, token: &str) {
    let body = if code == 200 {
        serde_json::json!({
            "code": code,
            "message": "success",
            "data": {
                "accessToken": token,
                "expireTime": "2099-01-01T00:00:00Z",
                "scope": "read_products"
            },
            "traceId": "token-trace"
        })
    } else {
        serde_json::json!({
            "code": code,
            "message": "app not installed",
            "traceId": "token-trace"
        })
    };

    Mock::given(method("POST"))
        .and(path("/admin/oauth/token/refresh"))
        .and(header("appkey", "app-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

fn managed_client(server: &MockServer) -> Client {
    let endpoint = TokenEndpoint::new(App::new("app-key", "app-secret"))
        .unwrap()
        .base_url(server.uri())
        .unwrap();
    let manager = TokenManager::builder("open001", "app-key", Arc::new(endpoint)).build();

    client_for(server).token_manager(manager).build().unwrap()
}

#[tokio::test]
async fn test_token_manager_supplies_bearer_token() {
    let mock_server = MockServer::start().await;
    mount_token_endpoint(&mock_server, 200, "fresh-token").await;

    Mock::given(method("GET"))
        .and(path("/admin/openapi/v20251201/merchants/shop.json"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": {} })))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = managed_client(&mock_server);
    let path = client.create_path("merchants/shop.json");
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        client
            .get::<serde_json::Value>(&cancel, &path, None)
            .await
            .unwrap();
    }

    let token = client.token_manager().unwrap().current_token().unwrap();
    assert_eq!(token.access_token, "fresh-token");
}

#[tokio::test]
async fn test_token_refresh_failure_skips_request() {
    let mock_server = MockServer::start().await;
    mount_token_endpoint(&mock_server, 401, "").await;

    Mock::given(method("GET"))
        .and(path("/admin/openapi/v20251201/merchants/shop.json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = managed_client(&mock_server);
    let path = client.create_path("merchants/shop.json");

    let err = client
        .get::<serde_json::Value>(&CancellationToken::new(), &path, None)
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::TokenRefresh { ref handle, .. } if handle == "open001"),
        "got {:?}",
        err
    );
}

#[tokio::test]
async fn test_empty_body_decodes() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/admin/openapi/v20251201/products/9.json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let path = client.create_path("products/9.json");
    let cancel = CancellationToken::new();

    let response = client.delete::<()>(&cancel, &path).await.unwrap();
    assert_eq!(response.raw_body, "");
    Requester::delete(&client, &cancel, &path).await.unwrap();
}

#[derive(Deserialize)]
struct Count {
    count: u64,
}

struct ProductService<R> {
    requester: R,
}

impl<R: Requester> ProductService<R> {
    async fn count(&self, cancel: &CancellationToken, opts: &CountOptions) -> slshop::Result<u64> {
        let path = self.requester.create_path("products/count.json");
        let count: Count = self.requester.get(cancel, &path, Some(opts)).await?;
        Ok(count.count)
    }

    async fn delete(&self, cancel: &CancellationToken, id: u64) -> slshop::Result<()> {
        let path = self.requester.create_path(&format!("products/{}.json", id));
        self.requester.delete(cancel, &path).await
    }
}

#[tokio::test]
async fn test_services_use_requester() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/admin/openapi/v20251201/products/count.json"))
        .and(query_param("created_at_min", "2024-01-01T00:00:00Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "count": 12 })))
        .mount(&mock_server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/admin/openapi/v20251201/products/3.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = ProductService {
        requester: client_for(&mock_server).build().unwrap(),
    };
    let cancel = CancellationToken::new();
    let opts = CountOptions {
        created_at_min: "2024-01-01T00:00:00Z".to_string(),
        ..Default::default()
    };

    assert_eq!(service.count(&cancel, &opts).await.unwrap(), 12);
    service.delete(&cancel, 3).await.unwrap();
}

#[tokio::test]
async fn test_default_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("x-request-source", "inventory-sync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server)
        .default_header("X-Request-Source", "inventory-sync")
        .unwrap()
        .build()
        .unwrap();

    client
        .get::<serde_json::Value>(&CancellationToken::new(), "/shop.json", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_response_metadata() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("traceid", "resp-trace")
                .set_body_json(product(1, "Test"))
                .set_delay(Duration::from_millis(50)),
        )
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().unwrap();
    let response = client
        .get::<ProductEnvelope>(&CancellationToken::new(), "/products/1.json", None)
        .await
        .unwrap();

    assert!(response.latency >= Duration::from_millis(50));
    assert_eq!(response.header("traceid"), Some("resp-trace"));
    assert!(response.raw_body.contains("\"title\":\"Test\""));
}
