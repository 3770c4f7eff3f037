//! Middleware components for the HTTP server

pub mod app_info;
pub mod logging;
pub mod rate_limit;
