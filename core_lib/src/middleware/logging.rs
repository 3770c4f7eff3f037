//! Request tracing for the status endpoints

use std::time::Duration;

use axum::body::Body;
use http::{Request, Response, StatusCode};
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{
    DefaultOnBodyChunk, DefaultOnEos, MakeSpan, OnFailure, OnRequest, OnResponse, TraceLayer,
};
use tracing::{debug, error, info, info_span, warn, Span};

/// Liveness probes hit these paths every few seconds; the span carries a
/// `probe` field so they can be filtered out.
fn is_probe(path: &str) -> bool {
    path == "/ping" || path.starts_with("/actuator")
}

pub fn logging_layer() -> TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    impl MakeSpan<Body> + Clone,
    impl OnRequest<Body> + Clone,
    impl OnResponse<Body> + Clone,
    DefaultOnBodyChunk,
    DefaultOnEos,
    impl OnFailure<ServerErrorsFailureClass> + Clone,
> {
    TraceLayer::new_for_http()
        .make_span_with(|request: &Request<Body>| {
            let path = request.uri().path();
            info_span!(
                "request",
                method = %request.method(),
                path = %path,
                probe = is_probe(path),
            )
        })
        .on_request(|request: &Request<Body>, _span: &Span| {
            debug!("{} {}", request.method(), request.uri().path());
        })
        .on_response(|response: &Response<Body>, latency: Duration, _span: &Span| {
            let status = response.status();
            let latency_ms = latency.as_millis() as u64;

            match status {
                StatusCode::SERVICE_UNAVAILABLE => {
                    warn!(status = status.as_u16(), latency_ms, "health reported DOWN")
                }
                s if s.is_client_error() => {
                    warn!(status = s.as_u16(), latency_ms, "rejected")
                }
                s => info!(status = s.as_u16(), latency_ms, "served"),
            }
        })
        .on_failure(|class: ServerErrorsFailureClass, latency: Duration, _span: &Span| {
            error!(latency_ms = latency.as_millis() as u64, class = %class, "request failed");
        })
}
