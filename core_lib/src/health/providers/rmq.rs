//! RabbitMQ management API queue checks

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;

use super::{get_with_https_fallback, read_text, StatusProvider};
use crate::error::CheckError;
use crate::health::checks::{body_from, Body, Check, CheckResult};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueueInfo {
    pub name: String,
    pub vhost: String,
    pub state: String,
    pub consumers: i64,
    pub messages: i64,
    pub messages_ready: i64,
    pub messages_unacknowledged: i64,
    pub messages_ready_ram: i64,
    pub messages_details: RateDetails,
    pub backing_queue_status: BackingQueueStatus,
    pub message_stats: MessageStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RateDetails {
    pub rate: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackingQueueStatus {
    pub avg_ingress_rate: f64,
    pub avg_egress_rate: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessageStats {
    pub publish: i64,
    pub publish_details: RateDetails,
}

pub struct RmqProvider {
    client: reqwest::Client,
    last_messages: Mutex<HashMap<String, i64>>,
}

impl RmqProvider {
    pub fn new(timeout: Duration) -> Result<Self, CheckError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CheckError::Config(format!("can't build http client: {}", e)))?;
        Ok(Self {
            client,
            last_messages: Mutex::new(HashMap::new()),
        })
    }

    fn record_messages(&self, url: &str, messages: i64) -> i64 {
        let mut last = self.last_messages.lock();
        let previous = last.insert(url.to_string(), messages).unwrap_or(0);
        messages - previous
    }
}

pub fn queue_body(queue: &QueueInfo, messages_delta: i64) -> Body {
    body_from(json!({
        "name": queue.name,
        "vhost": queue.vhost,
        "state": queue.state,
        "consumers": queue.consumers,
        "messages": queue.messages,
        "messages_ready": queue.messages_ready,
        "messages_unacknowledged": queue.messages_unacknowledged,
        "messages_ready_ram": queue.messages_ready_ram,
        "messages_rate": queue.messages_details.rate,
        "avg_ingress_rate": queue.backing_queue_status.avg_ingress_rate,
        "avg_egress_rate": queue.backing_queue_status.avg_egress_rate,
        "publish": queue.message_stats.publish,
        "publish_rate": queue.message_stats.publish_details.rate,
        "messages_delta": messages_delta,
    }))
}

#[async_trait::async_trait]
impl StatusProvider for RmqProvider {
    async fn status(&self, check: &Check) -> Result<CheckResult, CheckError> {
        let start = Instant::now();
        let response = get_with_https_fallback(&self.client, "rmq://", &check.url).await?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(CheckError::Transport(format!(
                "rmq management api returned {} for {}",
                status, check.name
            )));
        }

        let raw = read_text(response, &check.url).await?;
        let queue: QueueInfo = serde_json::from_str(&raw)
            .map_err(|e| CheckError::Parse(format!("can't decode rmq queue response: {}", e)))?;

        let delta = self.record_messages(&check.url, queue.messages);
        Ok(CheckResult::new(&check.name, status)
            .with_body(queue_body(&queue, delta))
            .with_response_time(start.elapsed()))
    }
}
