use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::AppState;

/// Stamps every response with `App-Name` and `App-Version`.
pub async fn app_info_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Ok(name) = HeaderValue::from_str(&state.app_name) {
        headers.insert("App-Name", name);
    }
    if let Ok(version) = HeaderValue::from_str(&state.version) {
        headers.insert("App-Version", version);
    }
    response
}
