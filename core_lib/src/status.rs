//! Host status snapshot combining resource usage and dependency checks

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::health::{CheckResult, ExternalServices};
use crate::monitoring::{LoadAverage, ResourceSampler, Volume, VolumeUsage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub hostname: String,
    pub procs: usize,
    pub host_id: String,
    pub cpu_percent: i32,
    pub mem_percent: i32,
    pub uptime: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeUsage>,
    pub load_average: LoadAverage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<BTreeMap<String, CheckResult>>,
}

pub struct StatusService {
    volumes: Vec<Volume>,
    sampler: Arc<dyn ResourceSampler>,
    services: Option<Arc<ExternalServices>>,
}

impl StatusService {
    pub fn new(volumes: Vec<Volume>, sampler: Arc<dyn ResourceSampler>) -> Self {
        Self {
            volumes,
            sampler,
            services: None,
        }
    }

    pub fn with_services(mut self, services: Arc<ExternalServices>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn services(&self) -> Option<&Arc<ExternalServices>> {
        self.services.as_ref()
    }

    pub async fn get(&self) -> Result<Info> {
        let sampler = self.sampler.clone();
        let volumes = self.volumes.clone();
        let metrics = tokio::task::spawn_blocking(move || sampler.sample(&volumes))
            .await
            .map_err(|e| AppError::Sampler(format!("sampler task failed: {}", e)))??;

        let services = match &self.services {
            Some(external) => {
                let results = external.status().await;
                debug!("collected {} service results", results.len());
                Some(results.into_iter().map(|r| (r.name.clone(), r)).collect())
            }
            None => None,
        };

        Ok(Info {
            hostname: metrics.hostname,
            procs: metrics.procs,
            host_id: metrics.host_id,
            cpu_percent: metrics.cpu_percent,
            mem_percent: metrics.mem_percent,
            uptime: metrics.uptime,
            volumes: metrics.volumes.into_iter().map(|v| (v.name.clone(), v)).collect(),
            load_average: metrics.load_average,
            services,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{Check, Providers, StatusProvider};
    use crate::monitoring::HostMetrics;
    use crate::error::CheckError;
    use std::time::Duration;

    struct StaticSampler;

    impl ResourceSampler for StaticSampler {
        fn sample(&self, volumes: &[Volume]) -> Result<HostMetrics> {
            Ok(HostMetrics {
                hostname: "box".to_string(),
                procs: 42,
                host_id: "abc".to_string(),
                cpu_percent: 12,
                mem_percent: 34,
                uptime: 1000,
                load_average: LoadAverage { one: 0.5, five: 0.25, fifteen: 0.1 },
                volumes: volumes
                    .iter()
                    .map(|v| VolumeUsage { name: v.name.clone(), path: v.path.clone(), usage_percent: 55 })
                    .collect(),
            })
        }
    }

    struct FailingSampler;

    impl ResourceSampler for FailingSampler {
        fn sample(&self, _volumes: &[Volume]) -> Result<HostMetrics> {
            Err(AppError::Sampler("no disk".to_string()))
        }
    }

    struct Echo;

    #[async_trait::async_trait]
    impl StatusProvider for Echo {
        async fn status(&self, check: &Check) -> std::result::Result<CheckResult, CheckError> {
            Ok(CheckResult::ok(&check.name))
        }
    }

    #[tokio::test]
    async fn test_snapshot_without_services() {
        let service = StatusService::new(vec![Volume::new("root", "/")], Arc::new(StaticSampler));
        let info = service.get().await.unwrap();
        assert_eq!(info.hostname, "box");
        assert_eq!(info.volumes["root"].usage_percent, 55);
        assert!(info.services.is_none());

        let value = serde_json::to_value(&info).unwrap();
        assert!(value.get("services").is_none());
        assert_eq!(value["load_average"]["one"], 0.5);
        assert_eq!(value["volumes"]["root"]["path"], "/");
    }

    #[tokio::test]
    async fn test_snapshot_with_services() {
        let echo: Arc<dyn StatusProvider> = Arc::new(Echo);
        let providers = Providers {
            http: echo.clone(),
            mongo: echo.clone(),
            docker: echo.clone(),
            program: echo.clone(),
            nginx: echo.clone(),
            certificate: echo.clone(),
            file: echo.clone(),
            rmq: echo,
        };
        let external = ExternalServices::new(providers, 2, Duration::from_secs(1), &["b:http://b", "a:file:///a"]);
        let service = StatusService::new(Vec::new(), Arc::new(StaticSampler)).with_services(Arc::new(external));

        let info = service.get().await.unwrap();
        let services = info.services.unwrap();
        assert_eq!(services.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(services["a"].status_code, 200);
    }

    #[tokio::test]
    async fn test_sampler_failure_is_error() {
        let service = StatusService::new(Vec::new(), Arc::new(FailingSampler));
        assert!(matches!(service.get().await, Err(AppError::Sampler(_))));
    }
}
