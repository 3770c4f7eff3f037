//! Spring Boot Actuator compatible health documents

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::status::Info;

const USAGE_THRESHOLD: i32 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Up,
    Down,
}

impl Status {
    fn from_usage(percent: i32) -> Self {
        if percent >= USAGE_THRESHOLD {
            Status::Down
        } else {
            Status::Up
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Component {
    fn new(status: Status, details: Value) -> Self {
        Self {
            status,
            details: Some(details),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: Status,
    pub components: BTreeMap<String, Component>,
}

impl HealthResponse {
    pub fn from_info(info: &Info) -> Self {
        let mut components = BTreeMap::new();

        components.insert(
            "cpu".to_string(),
            Component::new(Status::from_usage(info.cpu_percent), json!({"percent": info.cpu_percent})),
        );
        components.insert(
            "memory".to_string(),
            Component::new(Status::from_usage(info.mem_percent), json!({"percent": info.mem_percent})),
        );

        for (name, volume) in &info.volumes {
            components.insert(
                format!("diskSpace:{}", name),
                Component::new(
                    Status::from_usage(volume.usage_percent),
                    json!({"path": volume.path, "percent": volume.usage_percent}),
                ),
            );
        }

        for (name, service) in info.services.iter().flatten() {
            let status = if service.is_success() { Status::Up } else { Status::Down };
            components.insert(
                format!("service:{}", name),
                Component::new(
                    status,
                    json!({
                        "status_code": service.status_code,
                        "response_time": service.response_time_ms,
                        "body": service.body,
                    }),
                ),
            );
        }

        components.insert(
            "loadAverage".to_string(),
            Component::new(
                Status::Up,
                json!({
                    "one": info.load_average.one,
                    "five": info.load_average.five,
                    "fifteen": info.load_average.fifteen,
                }),
            ),
        );

        let status = if components.values().any(|c| c.status == Status::Down) {
            Status::Down
        } else {
            Status::Up
        };

        Self { status, components }
    }

    pub fn is_up(&self) -> bool {
        self.status == Status::Up
    }
}

/// Links document served at the actuator root.
pub fn discovery() -> Value {
    json!({
        "_links": {
            "self": {"href": "/actuator", "templated": false},
            "health": {"href": "/actuator/health", "templated": false},
            "health-path": {"href": "/actuator/health/{*path}", "templated": true},
        }
    })
}
