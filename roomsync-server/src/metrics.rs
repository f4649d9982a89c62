//! Prometheus metrics for roomsync-server.
//!
//! Provides metrics collection and a Prometheus-compatible `/metrics` endpoint.

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use roomsync_core::RoomKind;

// Metric names as constants for consistency
const HTTP_REQUESTS_TOTAL: &str = "roomsync_http_requests_total";
const HTTP_REQUEST_DURATION: &str = "roomsync_http_request_duration_seconds";
const WS_CONNECTIONS_ACTIVE: &str = "roomsync_ws_connections_active";
const ROOMS_ACTIVE: &str = "roomsync_rooms_active";
const ROOM_EVENTS_TOTAL: &str = "roomsync_room_events_total";
const SIGNALING_RELAYS_TOTAL: &str = "roomsync_signaling_relays_total";
const ROOMS_SWEPT_TOTAL: &str = "roomsync_rooms_swept_total";
const VALIDATION_FAILURES_TOTAL: &str = "roomsync_validation_failures_total";
const RATE_LIMITED_TOTAL: &str = "roomsync_rate_limited_total";

/// Initialize metrics and return the Prometheus handle.
///
/// # Errors
///
/// Returns an error if the Prometheus recorder cannot be installed
/// (e.g., if another recorder is already installed).
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record an HTTP request.
///
/// # Arguments
///
/// * `method` - HTTP method (GET, POST, etc.)
/// * `path` - Request path
/// * `status` - HTTP status code
/// * `duration_secs` - Request duration in seconds
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        HTTP_REQUEST_DURATION,
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_secs);
}

/// Middleware that times every HTTP request and records it.
///
/// Labels use the matched route template rather than the raw path, so
/// per-room URLs do not blow up the metric cardinality.
pub async fn track_http_request(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path().to_string(), |p| p.as_str().to_string());

    let started = Instant::now();
    let response = next.run(request).await;
    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Update active WebSocket connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_connected_peers(count: usize) {
    gauge!(WS_CONNECTIONS_ACTIVE).set(count as f64);
}

/// Update the active room count for one room kind.
#[allow(clippy::cast_precision_loss)]
pub fn set_rooms_active(kind: RoomKind, count: usize) {
    gauge!(ROOMS_ACTIVE, "kind" => kind.to_string()).set(count as f64);
}

/// Record a room membership event.
///
/// # Arguments
///
/// * `kind` - Room kind the event applies to
/// * `event` - "join" or "leave"
pub fn record_room_event(kind: RoomKind, event: &str) {
    counter!(
        ROOM_EVENTS_TOTAL,
        "kind" => kind.to_string(),
        "event" => event.to_string()
    )
    .increment(1);
}

/// Record a signaling relay (WebRTC).
///
/// # Arguments
///
/// * `msg_type` - Relay message type (offer, answer, ice-candidate)
pub fn record_relay(msg_type: &str) {
    counter!(
        SIGNALING_RELAYS_TOTAL,
        "type" => msg_type.to_string()
    )
    .increment(1);
}

/// Record playback rooms removed by an eviction sweep.
pub fn record_rooms_swept(count: usize) {
    counter!(ROOMS_SWEPT_TOTAL).increment(count as u64);
}

/// Record an input validation failure.
///
/// # Arguments
///
/// * `validation_type` - Type of validation that failed (room code, sdp, position, etc.)
pub fn record_validation_failure(validation_type: &str) {
    counter!(
        VALIDATION_FAILURES_TOTAL,
        "type" => validation_type.to_string()
    )
    .increment(1);
}

/// Record a rate-limited request.
///
/// # Arguments
///
/// * `source` - Source of the rate-limited request (websocket, http, etc.)
pub fn record_rate_limited(source: &str) {
    counter!(
        RATE_LIMITED_TOTAL,
        "source" => source.to_string()
    )
    .increment(1);
}
