//! reqwest transport against a mock HTTP server.

use std::time::Duration;

use serde_json::json;
use upstream_guard::config::PoolConfig;
use upstream_guard::pool::{classify_response, Connection, Connector, HttpConnector, RequestDescriptor};
use upstream_guard::{ErrorKind, ResilienceError};
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connector() -> HttpConnector {
    HttpConnector::new(&PoolConfig::default())
}

#[tokio::test]
async fn test_sends_json_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "secret"))
        .and(body_json(json!({"prompt": "hi"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": "hello"})))
        .expect(1)
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/v1/messages", server.uri())).unwrap();
    let request = RequestDescriptor::post_json(url.clone(), json!({"prompt": "hi"})).header("x-api-key", "secret");
    let connection = connector().connect(&request.host_key().unwrap()).unwrap();

    let response = connection.send(&request).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.json::<serde_json::Value>().unwrap()["content"], "hello");
}

#[tokio::test]
async fn test_rate_limit_headers_are_visible() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/v1/messages", server.uri())).unwrap();
    let request = RequestDescriptor::post_json(url, json!({}));
    let connection = connector().connect(&request.host_key().unwrap()).unwrap();

    let response = connection.send(&request).await.unwrap();
    assert_eq!(response.header("Retry-After"), Some("3"));
    let err = classify_response(response).unwrap_err();
    assert!(matches!(err, ResilienceError::RateLimited { retry_after_secs: 3, status: 429 }));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/slow", server.uri())).unwrap();
    let request = RequestDescriptor::post_json(url, json!({})).timeout(Duration::from_millis(200));
    let connection = connector().connect(&request.host_key().unwrap()).unwrap();

    let err = connection.send(&request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_refused_connection_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("http://{}/v1", addr)).unwrap();
    let request = RequestDescriptor::post_json(url, json!({}));
    let connection = connector().connect(&request.host_key().unwrap()).unwrap();

    let err = connection.send(&request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.is_retryable());
}
