//! Rate limiting middleware

use std::sync::Arc;
use std::time::{Duration, Instant};
use std::collections::HashMap;
use std::net::IpAddr;
use parking_lot::Mutex;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;
use tracing::warn;

/// Sliding-window limiter keyed by client address.
#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<Mutex<HashMap<IpAddr, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            requests: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    pub fn per_second(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(1))
    }

    pub fn check(&self, ip: IpAddr) -> Result<usize, RateLimitError> {
        let now = Instant::now();
        let mut requests = self.requests.lock();

        // clients whose window emptied are dropped from the map
        requests.retain(|_, entries| {
            entries.retain(|&instant| now.duration_since(instant) < self.window);
            !entries.is_empty()
        });

        let entries = requests.entry(ip).or_default();

        if entries.len() >= self.max_requests {
            let oldest = entries.first().copied().unwrap_or(now);
            let reset_in = self.window.saturating_sub(now.duration_since(oldest));

            return Err(RateLimitError {
                retry_after_seconds: reset_in.as_secs().max(1),
                limit: self.max_requests,
            });
        }

        entries.push(now);
        Ok(self.max_requests - entries.len())
    }

    /// Number of clients with requests inside the current window.
    pub fn tracked_clients(&self) -> usize {
        self.requests.lock().len()
    }
}

#[derive(Debug)]
pub struct RateLimitError {
    pub retry_after_seconds: u64,
    pub limit: usize,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": "Too many requests",
            "status": StatusCode::TOO_MANY_REQUESTS.as_u16(),
        }));

        let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
        let headers = response.headers_mut();
        headers.insert("X-RateLimit-Limit", HeaderValue::from(self.limit));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from(0usize));
        headers.insert("Retry-After", HeaderValue::from(self.retry_after_seconds));

        response
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, RateLimitError> {
    let remaining = limiter.check(addr.ip()).map_err(|e| {
        warn!("rate limit exceeded for {}", addr.ip());
        e
    })?;

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(limiter.max_requests));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));

    Ok(response)
}
