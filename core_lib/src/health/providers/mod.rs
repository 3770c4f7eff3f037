//! Protocol-specific status providers and the router selecting them

pub mod certificate;
pub mod docker;
pub mod file;
pub mod http;
pub mod mongo;
pub mod nginx;
pub mod program;
pub mod rmq;

use std::sync::Arc;
use std::time::Duration;

use super::checks::{Check, CheckResult};
use super::clock::{Clock, SystemClock};
use crate::error::CheckError;

pub use certificate::CertificateProvider;
pub use docker::DockerProvider;
pub use file::FileProvider;
pub use http::HttpProvider;
pub use mongo::MongoProvider;
pub use nginx::NginxProvider;
pub use program::ProgramProvider;
pub use rmq::RmqProvider;

#[async_trait::async_trait]
pub trait StatusProvider: Send + Sync {
    async fn status(&self, check: &Check) -> Result<CheckResult, CheckError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Mongo,
    Docker,
    Program,
    Nginx,
    Certificate,
    File,
    Rmq,
}

impl Protocol {
    pub fn detect(url: &str) -> Option<Self> {
        let protocol = if url.starts_with("http://") || url.starts_with("https://") {
            Protocol::Http
        } else if url.starts_with("mongodb://") {
            Protocol::Mongo
        } else if url.starts_with("docker://") {
            Protocol::Docker
        } else if url.starts_with("program://") {
            Protocol::Program
        } else if url.starts_with("nginx://") {
            Protocol::Nginx
        } else if url.starts_with("cert://") {
            Protocol::Certificate
        } else if url.starts_with("file://") {
            Protocol::File
        } else if url.starts_with("rmq://") {
            Protocol::Rmq
        } else {
            return None;
        };
        Some(protocol)
    }
}

/// Fixed protocol to provider mapping, built once at startup.
#[derive(Clone)]
pub struct Providers {
    pub http: Arc<dyn StatusProvider>,
    pub mongo: Arc<dyn StatusProvider>,
    pub docker: Arc<dyn StatusProvider>,
    pub program: Arc<dyn StatusProvider>,
    pub nginx: Arc<dyn StatusProvider>,
    pub certificate: Arc<dyn StatusProvider>,
    pub file: Arc<dyn StatusProvider>,
    pub rmq: Arc<dyn StatusProvider>,
}

impl Providers {
    pub fn new(timeout: Duration, program_shell: bool) -> Result<Self, CheckError> {
        Self::with_clock(timeout, program_shell, Arc::new(SystemClock))
    }

    pub fn with_clock(
        timeout: Duration,
        program_shell: bool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CheckError> {
        Ok(Self {
            http: Arc::new(HttpProvider::new(timeout)?),
            mongo: Arc::new(MongoProvider::new(timeout).with_clock(clock.clone())),
            docker: Arc::new(DockerProvider::new(timeout)),
            program: Arc::new(ProgramProvider::new(timeout).with_shell(program_shell)),
            nginx: Arc::new(NginxProvider::new(timeout)?),
            certificate: Arc::new(CertificateProvider::new(timeout).with_clock(clock)),
            file: Arc::new(FileProvider::new()),
            rmq: Arc::new(RmqProvider::new(timeout)?),
        })
    }

    pub fn get(&self, protocol: Protocol) -> &Arc<dyn StatusProvider> {
        match protocol {
            Protocol::Http => &self.http,
            Protocol::Mongo => &self.mongo,
            Protocol::Docker => &self.docker,
            Protocol::Program => &self.program,
            Protocol::Nginx => &self.nginx,
            Protocol::Certificate => &self.certificate,
            Protocol::File => &self.file,
            Protocol::Rmq => &self.rmq,
        }
    }

    pub fn route(&self, url: &str) -> Result<Arc<dyn StatusProvider>, CheckError> {
        Protocol::detect(url)
            .map(|protocol| self.get(protocol).clone())
            .ok_or_else(|| CheckError::UnsupportedScheme(url.to_string()))
    }
}

/// Reads a response body, converting transport failures.
pub(crate) async fn read_text(response: reqwest::Response, url: &str) -> Result<String, CheckError> {
    response
        .text()
        .await
        .map_err(|e| CheckError::Transport(format!("failed to read response from {}: {}", url, e)))
}

/// Sends a GET to the https form of `url` and falls back to plain http on
/// transport failure.
pub(crate) async fn get_with_https_fallback(
    client: &reqwest::Client,
    scheme_prefix: &str,
    url: &str,
) -> Result<reqwest::Response, CheckError> {
    let rest = url.trim_start_matches(scheme_prefix);
    let https_url = format!("https://{}", rest);
    match send_get(client, &https_url).await {
        Ok(response) => Ok(response),
        Err(https_err) => {
            tracing::debug!("https request to {} failed, retrying with http: {}", https_url, https_err);
            let http_url = format!("http://{}", rest);
            send_get(client, &http_url).await
        }
    }
}

async fn send_get(client: &reqwest::Client, url: &str) -> Result<reqwest::Response, CheckError> {
    let mut parsed = reqwest::Url::parse(url)
        .map_err(|e| CheckError::Config(format!("invalid url {}: {}", url, e)))?;

    let username = parsed.username().to_string();
    let password = parsed.password().map(str::to_string);
    let mut request = if !username.is_empty() {
        let _ = parsed.set_username("");
        let _ = parsed.set_password(None);
        client.get(parsed).basic_auth(username, password)
    } else {
        client.get(parsed)
    };
    request = request.header(reqwest::header::ACCEPT, "*/*");

    request
        .send()
        .await
        .map_err(|e| CheckError::Transport(format!("request to {} failed: {}", url, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_detection() {
        assert_eq!(Protocol::detect("http://example.com"), Some(Protocol::Http));
        assert_eq!(Protocol::detect("https://example.com"), Some(Protocol::Http));
        assert_eq!(Protocol::detect("mongodb://localhost:27017"), Some(Protocol::Mongo));
        assert_eq!(Protocol::detect("docker:///var/run/docker.sock"), Some(Protocol::Docker));
        assert_eq!(Protocol::detect("program://ls"), Some(Protocol::Program));
        assert_eq!(Protocol::detect("nginx://example.com/status"), Some(Protocol::Nginx));
        assert_eq!(Protocol::detect("cert://example.com"), Some(Protocol::Certificate));
        assert_eq!(Protocol::detect("file:///tmp/foo"), Some(Protocol::File));
        assert_eq!(Protocol::detect("rmq://example.com/api/queues/v/q"), Some(Protocol::Rmq));
        assert_eq!(Protocol::detect("ftp://example.com"), None);
        assert_eq!(Protocol::detect("HTTP://example.com"), None);
    }
}
