//! Core library of the host and dependency health reporter.

pub mod actuator;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod monitoring;
pub mod status;

pub use actuator::HealthResponse;
pub use cache::{CacheStats, ResponseCache};
pub use config::{AppConfig, ServicesFile};
pub use error::{AppError, CheckError, Result, ScheduleError};
pub use handlers::routes::create_routes;
pub use health::{Check, CheckResult, ExternalServices, Providers, StatusProvider};
pub use middleware::rate_limit::RateLimiter;
pub use monitoring::{ResourceSampler, SystemSampler, Volume};
pub use status::{Info, StatusService};

use axum::{middleware as axum_middleware, Router};
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tracing::{error, info};

use crate::config::ServerConfig;

pub const APP_NAME: &str = "sys-agent";

#[derive(Clone)]
pub struct AppState {
    pub app_name: String,
    pub version: String,
    pub status: Arc<StatusService>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(status: StatusService) -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: Arc::new(status),
            rate_limiter: RateLimiter::per_second(ServerConfig::default().rate_limit_per_second),
        }
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }
}

/// Builds the router with tracing, app info headers, the concurrency limit
/// and, when `rate_limit_per_second > 0`, the per-client rate limiter. The
/// rate limiter needs the connect info provided by [`run_server`].
pub fn create_app(state: AppState, config: &ServerConfig) -> Router {
    let mut router = Router::new().merge(create_routes());

    router = router.layer(axum_middleware::from_fn_with_state(
        state.clone(),
        middleware::app_info::app_info_middleware,
    ));

    if config.rate_limit_per_second > 0 {
        router = router.layer(axum_middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    router = router.layer(ConcurrencyLimitLayer::new(config.max_concurrent_requests.max(1)));
    router = router.layer(middleware::logging::logging_layer());

    router.with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<()> {
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let app = app.into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
