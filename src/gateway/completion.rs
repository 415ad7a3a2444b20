//! Completion call and outcome types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::config::schema::Pricing;
use crate::error::{ResilienceError, Result};
use crate::pool::transport::RequestDescriptor;

/// Content type used when the caller does not pick one.
pub const COMPLETION_CONTENT_TYPE: &str = "completion";

/// One call to a completion provider.
#[derive(Debug, Clone)]
pub struct CompletionCall {
    /// Dependency name; selects breaker, retry policy and pricing.
    pub service: String,
    pub url: Url,
    /// Fully rendered request body.
    pub payload: Value,
    pub headers: Vec<(String, String)>,
    pub content_type: String,
    /// Explicit cache key; defaults to a fingerprint of service, URL and payload.
    pub cache_key: Option<String>,
    /// Skip cache reads, writes and coalescing.
    pub bypass_cache: bool,
    /// Overrides the content type's TTL.
    pub ttl: Option<Duration>,
    pub timeout: Option<Duration>,
    pub batchable: bool,
}

impl CompletionCall {
    pub fn new(service: impl Into<String>, url: Url, payload: Value) -> Self {
        Self {
            service: service.into(),
            url,
            payload,
            headers: Vec::new(),
            content_type: COMPLETION_CONTENT_TYPE.to_string(),
            cache_key: None,
            bypass_cache: false,
            ttl: None,
            timeout: None,
            batchable: false,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
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

    /// A fresh request for one attempt; each attempt gets its own id.
    pub fn to_request(&self) -> RequestDescriptor {
        let mut request = RequestDescriptor::post_json(self.url.clone(), self.payload.clone())
            .batchable(self.batchable);
        request.headers = self.headers.clone();
        request.timeout = self.timeout;
        request
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// What the caller gets back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub content: String,
    pub usage: Usage,
    pub cost: Option<f64>,
    /// Served from cache rather than the provider.
    #[serde(default)]
    pub cached: bool,
}

/// Price of `usage` under `pricing`.
pub fn cost(pricing: &Pricing, usage: &Usage) -> f64 {
    (usage.input_tokens as f64 / 1000.0) * pricing.input_per_1k
        + (usage.output_tokens as f64 / 1000.0) * pricing.output_per_1k
}

/// Extract text and usage from a provider response.
///
/// Understands message-style bodies (`content[].text`, `usage.input_tokens`),
/// choice-style bodies (`choices[0].message.content`, `usage.prompt_tokens`)
/// and a bare `content` string.
pub fn parse_completion(body: &Value) -> Result<(String, Usage)> {
    let usage = parse_usage(body.get("usage"));

    if let Some(blocks) = body.get("content").and_then(Value::as_array) {
        let text: String = blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str).unwrap_or("text") == "text")
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect();
        return Ok((text, usage));
    }

    if let Some(text) = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message").and_then(|m| m.get("content")).or_else(|| c.get("text")))
        .and_then(Value::as_str)
    {
        return Ok((text.to_string(), usage));
    }

    if let Some(text) = body.get("content").and_then(Value::as_str) {
        return Ok((text.to_string(), usage));
    }

    Err(ResilienceError::ExternalService {
        status: 200,
        message: "unrecognized completion response shape".into(),
    })
}

fn parse_usage(usage: Option<&Value>) -> Usage {
    let field = |names: &[&str]| -> u64 {
        names
            .iter()
            .find_map(|n| usage.and_then(|u| u.get(*n)).and_then(Value::as_u64))
            .unwrap_or(0)
    };
    Usage {
        input_tokens: field(&["input_tokens", "prompt_tokens"]),
        output_tokens: field(&["output_tokens", "completion_tokens"]),
    }
}
