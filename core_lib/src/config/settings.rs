use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::services::ServicesFile;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub checks: CheckConfig,
    pub volumes: Vec<String>,
    pub services: Vec<String>,
    pub services_file: Option<PathBuf>,
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub rate_limit_per_second: usize,
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    pub concurrency: usize,
    pub timeout_seconds: u64,
    pub program_shell: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            checks: CheckConfig::default(),
            volumes: vec!["root:/".to_string()],
            services: Vec::new(),
            services_file: None,
            debug: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "localhost:8080".to_string(),
            rate_limit_per_second: 10,
            max_concurrent_requests: 100,
        }
    }
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout_seconds: 5,
            program_shell: true,
        }
    }
}

impl CheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl AppConfig {
    /// Defaults, then `config.toml` when present, then `SYS_AGENT__*`
    /// variables (`SYS_AGENT__SERVER__LISTEN`, `SYS_AGENT__SERVICES`, ...).
    pub fn load() -> Result<Self, ConfigError> {
        let file = Path::new("config.toml");
        Self::load_from(file.exists().then_some(file))
    }

    pub fn load_from(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?);

        if let Some(file) = file {
            builder = builder.add_source(File::from(file));
        }

        builder = builder.add_source(
            Environment::with_prefix("SYS_AGENT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("volumes")
                .with_list_parse_key("services"),
        );

        let config = builder.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        app_config.validate()?;

        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen.trim().is_empty() {
            return Err(ConfigError::Message("Listen address cannot be empty".to_string()));
        }

        if self.server.max_concurrent_requests == 0 {
            return Err(ConfigError::Message(
                "Max concurrent requests must be greater than 0".to_string(),
            ));
        }

        if self.checks.concurrency == 0 {
            return Err(ConfigError::Message(
                "Check concurrency must be greater than 0".to_string(),
            ));
        }

        if self.checks.timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Check timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Volume and service declarations from the config merged with the ones
    /// from `services_file`, if set.
    pub fn declarations(&self) -> Result<(Vec<String>, Vec<String>), ConfigError> {
        let mut volumes = self.volumes.clone();
        let mut services = self.services.clone();

        if let Some(path) = &self.services_file {
            let file = ServicesFile::load(path)?;
            let file_volumes = file.marshal_volumes();
            if !file_volumes.is_empty() {
                volumes = file_volumes;
            }
            services.extend(file.marshal_services());
        }

        Ok((volumes, services))
    }
}
