//! Check declarations and the results produced for them

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// JSON object attached to a result by the provider that produced it.
pub type Body = Map<String, Value>;

/// A named external dependency to probe. Identity is the `(name, url)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub url: String,
}

impl Check {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// Value of a query parameter embedded in the check url.
    pub fn query_param(&self, key: &str) -> Option<String> {
        query_param(&self.url, key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status_code: u16,
    #[serde(rename = "response_time")]
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
}

impl CheckResult {
    pub fn new(name: impl Into<String>, status_code: u16) -> Self {
        Self {
            name: name.into(),
            status_code,
            response_time_ms: 0,
            body: None,
        }
    }

    pub fn ok(name: impl Into<String>) -> Self {
        Self::new(name, 200)
    }

    /// Execution failure: status 500 and no body.
    pub fn failed(name: impl Into<String>, elapsed: Duration) -> Self {
        Self::new(name, 500).with_response_time(elapsed)
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_response_time(mut self, elapsed: Duration) -> Self {
        self.response_time_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Splits `scheme://rest?query` at the first `?` and decodes the query pairs.
///
/// Works on raw strings so that multi-host mongo urls and socket paths are
/// handled the same way as plain http urls.
pub fn query_param(url: &str, key: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Url with its query string removed.
pub fn strip_query(url: &str) -> &str {
    match url.split_once('?') {
        Some((base, _)) => base,
        None => url,
    }
}

/// Builds a JSON object body from `json!({...})` output.
pub fn body_from(value: Value) -> Body {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_serializes_response_time_and_omits_empty_body() {
        let result = CheckResult::ok("s1").with_response_time(Duration::from_millis(42));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"name": "s1", "status_code": 200, "response_time": 42}));
    }

    #[test]
    fn test_query_param_extraction() {
        assert_eq!(
            query_param("http://example.com/health?cron=*/5_*_*_*_*", "cron").as_deref(),
            Some("*/5_*_*_*_*")
        );
        assert_eq!(
            query_param("docker:///var/run/docker.sock?containers=nginx:weather", "containers").as_deref(),
            Some("nginx:weather")
        );
        assert_eq!(query_param("http://example.com/health", "cron"), None);
        assert_eq!(
            query_param("mongodb://h1:27017,h2:27017/?replicaSet=rs0&oplogMaxDelta=30s", "oplogMaxDelta").as_deref(),
            Some("30s")
        );
    }

    #[test]
    fn test_strip_query() {
        assert_eq!(strip_query("file:///tmp/foo?cron=x"), "file:///tmp/foo");
        assert_eq!(strip_query("file:///tmp/foo"), "file:///tmp/foo");
    }
}
