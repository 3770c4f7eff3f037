//! Main entry point for the sys-agent binary

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use sys_agent_core::{
    create_app, run_server, AppConfig, AppState, ExternalServices, Providers, RateLimiter, StatusService,
    SystemSampler, Volume,
};
use tokio::net::lookup_host;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_tracing(config.debug);
    info!("sys-agent {}", env!("CARGO_PKG_VERSION"));

    let (volume_declarations, service_declarations) = config
        .declarations()
        .map_err(|e| anyhow::anyhow!("Failed to load service declarations: {}", e))?;
    let volumes = Volume::parse_all(&volume_declarations)?;
    info!("Volumes: {:?}", volumes);

    let mut status = StatusService::new(volumes, Arc::new(SystemSampler::new()));
    if !service_declarations.is_empty() {
        let providers = Providers::new(config.checks.timeout(), config.checks.program_shell)?;
        let services = ExternalServices::new(
            providers,
            config.checks.concurrency,
            config.checks.timeout(),
            &service_declarations,
        );
        info!("Registered {} external service checks", services.checks().len());
        status = status.with_services(Arc::new(services));
    }

    let state = AppState::new(status)
        .with_rate_limiter(RateLimiter::per_second(config.server.rate_limit_per_second));

    let addr: SocketAddr = lookup_host(config.server.listen.as_str())
        .await
        .map_err(|e| anyhow::anyhow!("Invalid listen address {}: {}", config.server.listen, e))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("Listen address {} did not resolve", config.server.listen))?;

    let app = create_app(state, &config.server);

    run_server(app, addr).await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(debug: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            let default_level = if debug { "debug" } else { "info" };

            format!(
                "sys_agent={level},sys_agent_core={level},tower_http={level}",
                level = default_level
            ).into()
        });

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_file(debug)
        .with_line_number(debug);

    let is_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    if is_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }
}
