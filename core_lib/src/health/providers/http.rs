//! Plain http(s) GET checks

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use super::{read_text, StatusProvider};
use crate::error::CheckError;
use crate::health::checks::{Body, Check, CheckResult};

pub struct HttpProvider {
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(timeout: Duration) -> Result<Self, CheckError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CheckError::Config(format!("can't build http client: {}", e)))?;
        Ok(Self { client })
    }
}

/// JSON object bodies are kept as is, anything else lands under `text`.
pub fn parse_body(raw: &str) -> Body {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut body = Body::new();
            body.insert("text".to_string(), Value::String(raw.to_string()));
            body
        }
    }
}

#[async_trait::async_trait]
impl StatusProvider for HttpProvider {
    async fn status(&self, check: &Check) -> Result<CheckResult, CheckError> {
        let start = Instant::now();
        let response = self
            .client
            .get(&check.url)
            .send()
            .await
            .map_err(|e| CheckError::Transport(format!("http request failed for {} {}: {}", check.name, check.url, e)))?;

        let status = response.status().as_u16();
        let raw = read_text(response, &check.url).await?;
        debug!("http check {} responded {} in {:?}", check.name, status, start.elapsed());

        Ok(CheckResult::new(&check.name, status)
            .with_body(parse_body(&raw))
            .with_response_time(start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_body_json_object() {
        let body = parse_body(r#"{"status":"ok","count":3}"#);
        assert_eq!(Value::Object(body), json!({"status": "ok", "count": 3}));
    }

    #[test]
    fn test_parse_body_falls_back_to_text() {
        let body = parse_body("pong");
        assert_eq!(Value::Object(body), json!({"text": "pong"}));

        let body = parse_body("[1,2,3]");
        assert_eq!(Value::Object(body), json!({"text": "[1,2,3]"}));
    }

    #[tokio::test]
    async fn test_status_reports_response_code_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"ok"}"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(Duration::from_secs(2)).unwrap();

        let result = provider
            .status(&Check::new("s1", format!("{}/health", server.uri())))
            .await
            .unwrap();
        assert_eq!(result.name, "s1");
        assert_eq!(result.status_code, 200);
        assert_eq!(result.body.unwrap()["status"], "ok");

        let result = provider
            .status(&Check::new("s2", format!("{}/broken", server.uri())))
            .await
            .unwrap();
        assert_eq!(result.status_code, 503);
        assert_eq!(result.body.unwrap()["text"], "down");
    }

    #[tokio::test]
    async fn test_status_connection_refused() {
        let provider = HttpProvider::new(Duration::from_secs(2)).unwrap();
        let err = provider
            .status(&Check::new("s1", "http://127.0.0.1:1/health"))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::Transport(_)));
    }
}
