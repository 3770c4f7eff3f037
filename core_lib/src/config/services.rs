//! Typed service declarations loaded from a YAML file

use std::path::Path;
use std::time::Duration;

use config::ConfigError;
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServicesFile {
    pub volumes: Vec<VolumeEntry>,
    pub services: ServiceSections,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceSections {
    pub http: Vec<HttpEntry>,
    pub certificate: Vec<CertificateEntry>,
    pub file: Vec<FileEntry>,
    pub mongo: Vec<MongoEntry>,
    pub nginx: Vec<NginxEntry>,
    pub program: Vec<ProgramEntry>,
    pub docker: Vec<DockerEntry>,
    pub rmq: Vec<RmqEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeEntry {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpEntry {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateEntry {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoEntry {
    pub name: String,
    pub url: String,
    #[serde(default, deserialize_with = "humantime_opt")]
    pub oplog_max_delta: Option<Duration>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default)]
    pub count_query: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NginxEntry {
    pub name: String,
    pub status_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramEntry {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub containers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RmqEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
    pub vhost: String,
    pub queue: String,
}

fn humantime_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        Some(raw) if !raw.trim().is_empty() => humantime::parse_duration(raw.trim())
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

fn trim_schemes<'a>(url: &'a str, schemes: &[&str]) -> &'a str {
    schemes
        .iter()
        .fold(url, |url, scheme| url.strip_prefix(scheme).unwrap_or(url))
}

fn append_param(url: &mut String, key: &str, value: &str) {
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(key);
    url.push('=');
    url.push_str(value);
}

impl ServicesFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Message(format!("can't read services file {}: {}", path.display(), e)))?;
        Self::parse(&data)
            .map_err(|e| ConfigError::Message(format!("can't parse services file {}: {}", path.display(), e)))
    }

    pub fn parse(data: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(data)
    }

    /// Volumes as `name:path` declarations.
    pub fn marshal_volumes(&self) -> Vec<String> {
        self.volumes
            .iter()
            .map(|v| format!("{}:{}", v.name, v.path))
            .collect()
    }

    /// Services as `name:url` declarations with normalized scheme prefixes.
    pub fn marshal_services(&self) -> Vec<String> {
        let sections = &self.services;
        let mut res = Vec::new();

        for v in &sections.http {
            res.push(format!("{}:{}", v.name, v.url));
        }

        for v in &sections.certificate {
            let url = trim_schemes(&v.url, &["https://", "http://"]);
            res.push(format!("{}:cert://{}", v.name, url));
        }

        for v in &sections.docker {
            let mut url = trim_schemes(&v.url, &["https://", "http://", "tcp://", "unix://"]).to_string();
            if !v.containers.is_empty() {
                append_param(&mut url, "containers", &v.containers.join(":"));
            }
            res.push(format!("{}:docker://{}", v.name, url));
        }

        for v in &sections.file {
            res.push(format!("{}:file://{}", v.name, v.path));
        }

        for v in &sections.mongo {
            let mut url = v.url.clone();
            if let Some(delta) = v.oplog_max_delta.filter(|d| !d.is_zero()) {
                let formatted = humantime::format_duration(delta).to_string().replace(' ', "");
                append_param(&mut url, "oplogMaxDelta", &formatted);
            }
            for (key, value) in [("collection", &v.collection), ("db", &v.db), ("count", &v.count_query)] {
                if let Some(value) = value.as_deref().filter(|s| !s.is_empty()) {
                    append_param(&mut url, key, value);
                }
            }
            res.push(format!("{}:{}", v.name, url));
        }

        for v in &sections.nginx {
            let url = trim_schemes(&v.status_url, &["http://", "https://"]);
            res.push(format!("{}:nginx://{}", v.name, url));
        }

        for v in &sections.program {
            let mut program = format!("{}:program://{}", v.name, v.path);
            if !v.args.is_empty() {
                program.push_str(&format!("?args=\"{}\"", v.args.join(" ")));
            }
            res.push(program);
        }

        for v in &sections.rmq {
            let mut url = trim_schemes(&v.url, &["http://", "https://"]).to_string();
            if let (Some(user), Some(pass)) = (&v.user, &v.pass) {
                if !user.is_empty() && !pass.is_empty() {
                    url = format!("{}:{}@{}", user, pass, url);
                }
            }
            res.push(format!("{}:rmq://{}/{}/{}", v.name, url.trim_end_matches('/'), v.vhost, v.queue));
        }

        res
    }
}
