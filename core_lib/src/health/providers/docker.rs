//! Docker daemon container checks over a unix socket or tcp

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use hyper::body::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tracing::debug;

use super::StatusProvider;
use crate::error::CheckError;
use crate::health::checks::{body_from, strip_query, Body, Check, CheckResult};

const CONTAINERS_PATH: &str = "/v1.24/containers/json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerEndpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl DockerEndpoint {
    /// `docker:///path.sock` is a unix socket, `docker://host:port` is tcp.
    pub fn parse(url: &str) -> Result<Self, CheckError> {
        let target = strip_query(url.trim_start_matches("docker://"));
        if target.is_empty() {
            return Err(CheckError::Config(format!("empty docker endpoint in {}", url)));
        }
        if target.starts_with('/') {
            Ok(DockerEndpoint::Unix(PathBuf::from(target)))
        } else {
            Ok(DockerEndpoint::Tcp(target.trim_end_matches('/').to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContainerEntry {
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub name: String,
    pub state: String,
    pub status: String,
}

pub struct DockerProvider {
    timeout: Duration,
}

impl DockerProvider {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn fetch(&self, endpoint: &DockerEndpoint) -> Result<(u16, Bytes), CheckError> {
        let request = async {
            match endpoint {
                DockerEndpoint::Unix(path) => {
                    let stream = UnixStream::connect(path).await.map_err(|e| {
                        CheckError::Transport(format!("can't connect to docker socket {}: {}", path.display(), e))
                    })?;
                    get_containers(stream).await
                }
                DockerEndpoint::Tcp(address) => {
                    let stream = TcpStream::connect(address.as_str()).await.map_err(|e| {
                        CheckError::Transport(format!("can't connect to docker at {}: {}", address, e))
                    })?;
                    get_containers(stream).await
                }
            }
        };
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| CheckError::Timeout(self.timeout))?
    }
}

async fn get_containers<S>(stream: S) -> Result<(u16, Bytes), CheckError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::handshake(stream)
        .await
        .map_err(|e| CheckError::Transport(format!("docker handshake failed: {}", e)))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("docker connection closed with error: {}", e);
        }
    });

    let request = hyper::Request::builder()
        .method(hyper::Method::GET)
        .uri(CONTAINERS_PATH)
        .header(hyper::header::HOST, "localhost")
        .body(hyper::Body::empty())
        .map_err(|e| CheckError::Transport(format!("can't build docker request: {}", e)))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| CheckError::Transport(format!("docker request failed: {}", e)))?;
    let status = response.status().as_u16();
    let body = hyper::body::to_bytes(response.into_body())
        .await
        .map_err(|e| CheckError::Transport(format!("can't read docker response: {}", e)))?;
    Ok((status, body))
}

/// Required container names from the `containers` query parameter.
pub fn required_containers(check: &Check) -> Vec<String> {
    check
        .query_param("containers")
        .map(|raw| {
            raw.split(':')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Summarizes the daemon's container list against the required names.
pub fn parse_containers(raw: &[u8], required: &[String]) -> Result<Body, CheckError> {
    let entries: Vec<ContainerEntry> = serde_json::from_slice(raw)
        .map_err(|e| CheckError::Parse(format!("can't decode docker response: {}", e)))?;

    let mut containers = BTreeMap::new();
    let (mut running, mut healthy, mut unhealthy) = (0, 0, 0);

    for entry in entries {
        let Some(first) = entry.names.first() else {
            continue;
        };
        if first == "/" {
            continue;
        }
        let name = first.trim_start_matches('/').to_string();

        if entry.state == "running" {
            running += 1;
        }
        if entry.status.ends_with("(healthy)") {
            healthy += 1;
        }
        if entry.status.ends_with("(unhealthy)") {
            unhealthy += 1;
        }

        containers.insert(
            name.clone(),
            ContainerInfo {
                name,
                state: entry.state,
                status: entry.status,
            },
        );
    }

    let mut missing = BTreeSet::new();
    for name in required {
        match containers.get(name) {
            Some(info) if info.state == "running" => {}
            _ => {
                missing.insert(name.clone());
            }
        }
    }
    let required_status = if missing.is_empty() {
        "ok".to_string()
    } else {
        format!("failed: {}", missing.into_iter().collect::<Vec<_>>().join(","))
    };

    let total = containers.len();
    Ok(body_from(json!({
        "containers": containers,
        "total": total,
        "running": running,
        "healthy": healthy,
        "unhealthy": unhealthy,
        "failed": total - running,
        "required": required_status,
    })))
}

#[async_trait::async_trait]
impl StatusProvider for DockerProvider {
    async fn status(&self, check: &Check) -> Result<CheckResult, CheckError> {
        let start = Instant::now();
        let endpoint = DockerEndpoint::parse(&check.url)?;
        let (status, raw) = self.fetch(&endpoint).await?;

        let body = parse_containers(&raw, &required_containers(check))?;
        Ok(CheckResult::new(&check.name, status)
            .with_body(body)
            .with_response_time(start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    const CONTAINERS: &str = r#"[
        {"Names": ["/nginx"], "State": "running", "Status": "Up 2 hours (healthy)"},
        {"Names": ["/weather"], "State": "running", "Status": "Up 2 hours (unhealthy)"},
        {"Names": ["/backup"], "State": "exited", "Status": "Exited (0) 3 hours ago"},
        {"Names": ["/"], "State": "running", "Status": "Up"},
        {"Names": [], "State": "running", "Status": "Up"}
    ]"#;

    fn required(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!(
            DockerEndpoint::parse("docker:///var/run/docker.sock?containers=a:b").unwrap(),
            DockerEndpoint::Unix(PathBuf::from("/var/run/docker.sock"))
        );
        assert_eq!(
            DockerEndpoint::parse("docker://10.0.0.1:2375").unwrap(),
            DockerEndpoint::Tcp("10.0.0.1:2375".to_string())
        );
        assert!(DockerEndpoint::parse("docker://").is_err());
    }

    #[test]
    fn test_parse_containers_counts() {
        let body = parse_containers(CONTAINERS.as_bytes(), &[]).unwrap();
        assert_eq!(body["total"], 3);
        assert_eq!(body["running"], 2);
        assert_eq!(body["healthy"], 1);
        assert_eq!(body["unhealthy"], 1);
        assert_eq!(body["failed"], 1);
        assert_eq!(body["required"], "ok");
        assert_eq!(body["containers"]["nginx"]["status"], "Up 2 hours (healthy)");
        assert_eq!(body["containers"]["backup"]["state"], "exited");
    }

    #[test]
    fn test_required_containers() {
        let body = parse_containers(CONTAINERS.as_bytes(), &required(&["nginx", "missing"])).unwrap();
        assert_eq!(body["required"], "failed: missing");

        let body = parse_containers(CONTAINERS.as_bytes(), &required(&["nginx", "weather"])).unwrap();
        assert_eq!(body["required"], "ok");

        let body = parse_containers(CONTAINERS.as_bytes(), &required(&["backup", "nginx", "zzz"])).unwrap();
        assert_eq!(body["required"], "failed: backup,zzz");
    }

    #[test]
    fn test_required_containers_from_query() {
        let check = Check::new("d", "docker:///var/run/docker.sock?containers=nginx:weather");
        assert_eq!(required_containers(&check), required(&["nginx", "weather"]));
    }

    #[tokio::test]
    async fn test_status_over_unix_socket() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            assert!(request.starts_with("GET /v1.24/containers/json"));

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                CONTAINERS.len(),
                CONTAINERS
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        let provider = DockerProvider::new(Duration::from_secs(2));
        let check = Check::new(
            "docker",
            format!("docker://{}?containers=nginx:missing", socket.display()),
        );
        let result = provider.status(&check).await.unwrap();
        assert_eq!(result.status_code, 200);
        let body = result.body.unwrap();
        assert_eq!(body["total"], 3);
        assert_eq!(body["required"], "failed: missing");
    }

    #[tokio::test]
    async fn test_status_unreachable_daemon() {
        let provider = DockerProvider::new(Duration::from_secs(1));
        let err = provider
            .status(&Check::new("docker", "docker:///definitely/not/a/docker.sock"))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::Transport(_)));
    }
}
