//! nginx stub_status checks

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use super::{get_with_https_fallback, read_text, StatusProvider};
use crate::error::CheckError;
use crate::health::checks::{body_from, Check, CheckResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StubStatus {
    pub active_connections: i64,
    pub accepts: i64,
    pub handled: i64,
    pub requests: i64,
    pub reading: i64,
    pub writing: i64,
    pub waiting: i64,
    pub change_handled: i64,
}

pub struct NginxProvider {
    client: reqwest::Client,
    last_handled: Mutex<HashMap<String, i64>>,
}

impl NginxProvider {
    pub fn new(timeout: Duration) -> Result<Self, CheckError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CheckError::Config(format!("can't build http client: {}", e)))?;
        Ok(Self {
            client,
            last_handled: Mutex::new(HashMap::new()),
        })
    }

    /// Stores `handled` for `url` and returns the difference to the previous
    /// observation of the same url (0 before the first one).
    pub fn record_handled(&self, url: &str, handled: i64) -> i64 {
        let mut last = self.last_handled.lock();
        let previous = last.insert(url.to_string(), handled).unwrap_or(0);
        handled - previous
    }
}

#[async_trait::async_trait]
impl StatusProvider for NginxProvider {
    async fn status(&self, check: &Check) -> Result<CheckResult, CheckError> {
        let start = Instant::now();
        let response = get_with_https_fallback(&self.client, "nginx://", &check.url).await?;

        let status = response.status().as_u16();
        if status != 200 {
            return Ok(CheckResult::new(&check.name, status).with_response_time(start.elapsed()));
        }

        let raw = read_text(response, &check.url).await?;
        let mut stub = parse_stub_status(&raw)?;
        stub.change_handled = self.record_handled(&check.url, stub.handled);

        let body = body_from(serde_json::to_value(&stub).map_err(|e| CheckError::Parse(e.to_string()))?);
        Ok(CheckResult::new(&check.name, status)
            .with_body(body)
            .with_response_time(start.elapsed()))
    }
}

/// Parses the four-line `stub_status` page:
///
/// ```text
/// Active connections: 291
/// server accepts handled requests
///  16630948 16630948 31070465
/// Reading: 6 Writing: 179 Waiting: 106
/// ```
pub fn parse_stub_status(raw: &str) -> Result<StubStatus, CheckError> {
    let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.len() < 4 {
        return Err(CheckError::Parse("response is too short".to_string()));
    }

    let active = lines[0]
        .strip_prefix("Active connections:")
        .ok_or_else(|| CheckError::Parse(format!("unexpected first line {:?}", lines[0])))?;
    let active_connections = parse_number(active.trim(), "active connections")?;

    if lines[1] != "server accepts handled requests" {
        return Err(CheckError::Parse(format!("unexpected second line {:?}", lines[1])));
    }

    let counters: Vec<&str> = lines[2].split_whitespace().collect();
    if counters.len() != 3 {
        return Err(CheckError::Parse(format!("unexpected counters line {:?}", lines[2])));
    }

    let fields: Vec<&str> = lines[3].split_whitespace().collect();
    if fields.len() != 6 || fields[0] != "Reading:" || fields[2] != "Writing:" || fields[4] != "Waiting:" {
        return Err(CheckError::Parse(format!("unexpected connections line {:?}", lines[3])));
    }

    Ok(StubStatus {
        active_connections,
        accepts: parse_number(counters[0], "accepts")?,
        handled: parse_number(counters[1], "handled")?,
        requests: parse_number(counters[2], "requests")?,
        reading: parse_number(fields[1], "reading")?,
        writing: parse_number(fields[3], "writing")?,
        waiting: parse_number(fields[5], "waiting")?,
        change_handled: 0,
    })
}

fn parse_number(raw: &str, field: &str) -> Result<i64, CheckError> {
    raw.parse::<i64>()
        .map_err(|e| CheckError::Parse(format!("can't parse {} from {:?}: {}", field, raw, e)))
}
