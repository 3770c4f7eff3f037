//! Host resource sampling

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use tracing::debug;

use crate::error::{AppError, Result};

/// Named filesystem location whose disk usage is reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub path: String,
}

impl Volume {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Parses `name:path` declarations.
    pub fn parse_all<S: AsRef<str>>(declarations: &[S]) -> Result<Vec<Volume>> {
        declarations
            .iter()
            .map(|raw| {
                let raw = raw.as_ref();
                match raw.split_once(':') {
                    Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok(Volume::new(name, path)),
                    _ => Err(AppError::Config(format!("invalid volume declaration {:?}, expected name:path", raw))),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeUsage {
    pub name: String,
    pub path: String,
    pub usage_percent: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    pub hostname: String,
    pub procs: usize,
    pub host_id: String,
    pub cpu_percent: i32,
    pub mem_percent: i32,
    pub uptime: u64,
    pub load_average: LoadAverage,
    pub volumes: Vec<VolumeUsage>,
}

pub trait ResourceSampler: Send + Sync {
    fn sample(&self, volumes: &[Volume]) -> Result<HostMetrics>;
}

pub struct SystemSampler {
    system: Arc<Mutex<System>>,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();

        Self {
            system: Arc::new(Mutex::new(system)),
        }
    }

    fn volume_usage(disks: &Disks, volume: &Volume) -> Result<VolumeUsage> {
        let target = Path::new(&volume.path);
        let disk = disks
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .ok_or_else(|| AppError::Sampler(format!("no disk found for volume {} at {}", volume.name, volume.path)))?;

        let total = disk.total_space();
        let used = total.saturating_sub(disk.available_space());
        let usage_percent = if total > 0 {
            (used as f64 / total as f64 * 100.0) as i32
        } else {
            0
        };

        Ok(VolumeUsage {
            name: volume.name.clone(),
            path: volume.path.clone(),
            usage_percent,
        })
    }
}

fn host_id() -> String {
    ["/etc/machine-id", "/var/lib/dbus/machine-id"]
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok())
        .map(|id| id.trim().to_string())
        .unwrap_or_default()
}

impl ResourceSampler for SystemSampler {
    fn sample(&self, volumes: &[Volume]) -> Result<HostMetrics> {
        let mut system = self.system.lock();
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_processes();

        let total_memory = system.total_memory();
        let mem_percent = if total_memory > 0 {
            (system.used_memory() as f64 / total_memory as f64 * 100.0) as i32
        } else {
            0
        };

        let disks = Disks::new_with_refreshed_list();
        let volumes = volumes
            .iter()
            .map(|volume| Self::volume_usage(&disks, volume))
            .collect::<Result<Vec<_>>>()?;

        let load = System::load_average();
        let metrics = HostMetrics {
            hostname: System::host_name().unwrap_or_default(),
            procs: system.processes().len(),
            host_id: host_id(),
            cpu_percent: system.global_cpu_info().cpu_usage() as i32,
            mem_percent,
            uptime: System::uptime(),
            load_average: LoadAverage {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
            },
            volumes,
        };

        debug!("sampled host metrics: cpu {}%, mem {}%", metrics.cpu_percent, metrics.mem_percent);
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_volumes() {
        let volumes = Volume::parse_all(&["root:/", "data:/mnt/data"]).unwrap();
        assert_eq!(volumes, vec![Volume::new("root", "/"), Volume::new("data", "/mnt/data")]);

        assert!(Volume::parse_all(&["nopath"]).is_err());
        assert!(Volume::parse_all(&[":/"]).is_err());
    }

    #[test]
    fn test_sample_without_volumes() {
        let sampler = SystemSampler::new();
        let metrics = sampler.sample(&[]).unwrap();
        assert!(metrics.procs > 0);
        assert!((0..=100).contains(&metrics.mem_percent));
        assert!(metrics.volumes.is_empty());
    }

    #[test]
    fn test_sample_unknown_volume_is_error() {
        let sampler = SystemSampler::new();
        let result = sampler.sample(&[Volume::new("bad", "relative/path")]);
        assert!(result.is_err());
    }
}
