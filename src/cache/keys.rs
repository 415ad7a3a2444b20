//! Cache key composition and pattern matching.

use serde::Serialize;

use crate::error::{ResilienceError, Result};

/// Marker placed before a hashed key segment.
const HASH_MARKER: char = '#';

/// Builds namespaced keys of the form `{prefix}:{content_type}:{key}`.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
    max_len: usize,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>, max_len: usize) -> Self {
        Self {
            prefix: prefix.into(),
            max_len,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Compose the storage key, hashing the caller key when the result would be too long.
    ///
    /// Hashed keys keep the prefix and content type so type-scoped clears still reach them.
    pub fn build(&self, content_type: &str, key: &str) -> String {
        let composed = format!("{}:{}:{}", self.prefix, content_type, key);
        if composed.len() <= self.max_len {
            return composed;
        }
        let digest = blake3::hash(composed.as_bytes());
        format!("{}:{}:{}{}", self.prefix, content_type, HASH_MARKER, digest.to_hex())
    }

    /// Glob pattern addressing keys in the given scope.
    ///
    /// `None` for either part matches everything at that level.
    pub fn pattern(&self, content_type: Option<&str>, pattern: Option<&str>) -> String {
        format!(
            "{}:{}:{}",
            self.prefix,
            content_type.unwrap_or("*"),
            pattern.unwrap_or("*")
        )
    }
}

/// Deterministic content fingerprint of a serializable value.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| ResilienceError::Validation(format!("request is not serializable: {}", e)))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Glob match supporting `*` (any run, including empty) and `?` (one character).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
