//! TLS certificate expiration checks

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;

use super::StatusProvider;
use crate::error::CheckError;
use crate::health::checks::{body_from, strip_query, Body, Check, CheckResult};
use crate::health::clock::{Clock, SystemClock};

const DEFAULT_PORT: u16 = 443;
const EXPIRING_SOON_DAYS: i64 = 5;

pub struct CertificateProvider {
    timeout: Duration,
    clock: Arc<dyn Clock>,
    connector: TlsConnector,
}

impl CertificateProvider {
    pub fn new(timeout: Duration) -> Self {
        let mut roots = RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|anchor| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                anchor.subject,
                anchor.spki,
                anchor.name_constraints,
            )
        }));
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            timeout,
            clock: Arc::new(SystemClock),
            connector: TlsConnector::from(Arc::new(config)),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn earliest_expiration(&self, host: &str, port: u16) -> Result<DateTime<Utc>, CheckError> {
        let server_name = ServerName::try_from(host)
            .map_err(|e| CheckError::Config(format!("invalid certificate host {}: {}", host, e)))?;

        let handshake = async {
            let tcp = TcpStream::connect((host, port))
                .await
                .map_err(|e| CheckError::Transport(format!("can't connect to {}:{}: {}", host, port, e)))?;
            self.connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| CheckError::Transport(format!("tls handshake with {} failed: {}", host, e)))
        };
        let stream = tokio::time::timeout(self.timeout, handshake)
            .await
            .map_err(|_| CheckError::Timeout(self.timeout))??;

        let (_, session) = stream.get_ref();
        let certificates = session
            .peer_certificates()
            .ok_or_else(|| CheckError::Transport(format!("no peer certificates from {}", host)))?;

        earliest_not_after(certificates)
    }
}

fn earliest_not_after(certificates: &[rustls::Certificate]) -> Result<DateTime<Utc>, CheckError> {
    let mut earliest: Option<i64> = None;
    for certificate in certificates {
        let (_, parsed) = x509_parser::parse_x509_certificate(certificate.as_ref())
            .map_err(|e| CheckError::Parse(format!("can't parse certificate: {}", e)))?;
        let not_after = parsed.validity().not_after.timestamp();
        earliest = Some(earliest.map_or(not_after, |current| current.min(not_after)));
    }

    let timestamp = earliest.ok_or_else(|| CheckError::Parse("empty certificate chain".to_string()))?;
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .ok_or_else(|| CheckError::Parse(format!("invalid certificate expiration {}", timestamp)))
}

/// `cert://host` or `cert://host:port`; paths and queries are ignored.
pub fn parse_target(url: &str) -> Result<(String, u16), CheckError> {
    let rest = strip_query(url.trim_start_matches("cert://"));
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(CheckError::Config(format!("empty certificate host in {}", url)));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|e| CheckError::Config(format!("invalid port in {}: {}", url, e)))?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), DEFAULT_PORT)),
    }
}

pub fn expiration_body(host: &str, expire: DateTime<Utc>, now: DateTime<Utc>) -> Body {
    let left = expire.signed_duration_since(now);
    let days_left = left.num_seconds() / 86_400;

    let status = if left.num_seconds() <= 0 {
        "expired".to_string()
    } else if days_left < EXPIRING_SOON_DAYS {
        format!("expiring soon, in {} days", days_left)
    } else {
        "ok".to_string()
    };

    body_from(json!({
        "expire": expire.to_rfc3339_opts(SecondsFormat::Secs, true),
        "days_left": days_left,
        "host": format!("https://{}", host),
        "status": status,
    }))
}

#[async_trait::async_trait]
impl StatusProvider for CertificateProvider {
    async fn status(&self, check: &Check) -> Result<CheckResult, CheckError> {
        let start = Instant::now();
        let (host, port) = parse_target(&check.url)?;
        let expire = self.earliest_expiration(&host, port).await?;
        let now = self.clock.now().with_timezone(&Utc);

        Ok(CheckResult::ok(&check.name)
            .with_body(expiration_body(&host, expire, now))
            .with_response_time(start.elapsed()))
    }
}
