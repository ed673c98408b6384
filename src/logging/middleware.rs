use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tracing::Instrument;

fn request_id_of(request: &Request) -> String {
    request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Runs the request inside a span tagged with its request id and logs the outcome.
pub async fn log_request(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "static".to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id_of(&request),
        method = %method,
        route = %route,
    );

    async move {
        tracing::debug!(uri = %uri, "incoming request");

        let response = next.run(request).await;

        let status = response.status();
        let duration_ms = start.elapsed().as_millis();
        if status.is_server_error() {
            tracing::error!(uri = %uri, status = %status, duration_ms = %duration_ms, "request failed");
        } else if status.is_client_error() {
            tracing::warn!(uri = %uri, status = %status, duration_ms = %duration_ms, "request rejected");
        } else {
            tracing::info!(uri = %uri, status = %status, duration_ms = %duration_ms, "request completed");
        }

        response
    }
    .instrument(span)
    .await
}

pub fn request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}
