//! Transport seam between the pool and the network.
//!
//! # Responsibilities
//! - Describe an outbound request independently of the HTTP client
//! - Open one pooled client per remote host
//! - Map upstream statuses onto the failure taxonomy

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use url::Url;
use uuid::Uuid;

use crate::config::schema::PoolConfig;
use crate::error::{ResilienceError, Result};

/// Wait applied when a rate-limit response carries no usable Retry-After.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Longest upstream body excerpt kept in an error message.
const ERROR_BODY_LIMIT: usize = 512;

/// One outbound request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub id: Uuid,
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Overrides the pool's default request deadline.
    pub timeout: Option<Duration>,
    /// May share a dispatch window with compatible requests.
    pub batchable: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            url,
            headers: Vec::new(),
            body: None,
            timeout: None,
            batchable: false,
        }
    }

    pub fn post_json(url: Url, body: serde_json::Value) -> Self {
        let mut desc = Self::new(Method::POST, url);
        desc.body = Some(body);
        desc
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn batchable(mut self, batchable: bool) -> Self {
        self.batchable = batchable;
        self
    }

    /// `scheme://host:port` of the target; the pool's per-host identity.
    pub fn host_key(&self) -> Result<String> {
        host_key(&self.url)
    }
}

/// Pool identity of a URL.
pub fn host_key(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| ResilienceError::Validation(format!("url has no host: {}", url)))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ResilienceError::Validation(format!("url has no port: {}", url)))?;
    Ok(format!("{}://{}:{}", url.scheme(), host, port))
}

/// Raw upstream answer, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| ResilienceError::ExternalService {
            status: self.status,
            message: format!("malformed response body: {}", e),
        })
    }
}

/// Turn failure statuses into typed errors.
///
/// 400 and 422 are caller errors, 429 is a rate limit with its Retry-After
/// hint, anything else at or above 400 is an external-service failure.
pub fn classify_response(response: UpstreamResponse) -> Result<UpstreamResponse> {
    if response.status < 400 {
        return Ok(response);
    }
    let message = excerpt(&response.body);
    match response.status {
        429 => Err(ResilienceError::RateLimited {
            retry_after_secs: response
                .header("retry-after")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            status: 429,
        }),
        400 | 422 => Err(ResilienceError::Validation(format!(
            "upstream rejected request ({}): {}",
            response.status, message
        ))),
        status => Err(ResilienceError::ExternalService { status, message }),
    }
}

fn excerpt(body: &str) -> String {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// A reusable channel to one remote host.
#[async_trait]
pub trait Connection: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: &RequestDescriptor) -> Result<UpstreamResponse>;
}

/// Opens connections per host.
pub trait Connector: Send + Sync + std::fmt::Debug {
    fn connect(&self, host: &str) -> Result<Arc<dyn Connection>>;
}

/// reqwest-backed connector: one keep-alive client per host.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    max_idle_per_host: usize,
    idle_timeout: Duration,
    connect_timeout: Duration,
}

impl HttpConnector {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            max_idle_per_host: config.max_idle_per_host,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }
}

impl Connector for HttpConnector {
    fn connect(&self, host: &str) -> Result<Arc<dyn Connection>> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(self.idle_timeout)
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| ResilienceError::Internal(format!("failed to build client for {}: {}", host, e)))?;
        tracing::debug!(host = %host, "Opened connection pool for host");
        Ok(Arc::new(HttpConnection {
            client,
            host: host.to_string(),
        }))
    }
}

#[derive(Debug)]
struct HttpConnection {
    client: reqwest::Client,
    host: String,
}

#[async_trait]
impl Connection for HttpConnection {
    async fn send(&self, request: &RequestDescriptor) -> Result<UpstreamResponse> {
        let mut builder = self.client.request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| self.map_error(e, request))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response.text().await.map_err(|e| self.map_error(e, request))?;

        Ok(UpstreamResponse { status, headers, body })
    }
}

impl HttpConnection {
    fn map_error(&self, e: reqwest::Error, request: &RequestDescriptor) -> ResilienceError {
        if e.is_timeout() {
            ResilienceError::Timeout {
                timeout_ms: request.timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
            }
        } else {
            tracing::debug!(host = %self.host, error = %e, "Upstream transport error");
            ResilienceError::Network(e.to_string())
        }
    }
}
