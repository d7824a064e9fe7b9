use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use lndock_core::{
    Action, LogStats, NodeDescriptor, PoolError, PoolStats, SessionPool, StatsObserver,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: SessionPool,
    pub auth_token: String,
    pub unsafe_log: bool,
}

/// `POST /rpc` request envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RpcRequest {
    #[serde(default)]
    pub connection: NodeDescriptor,
    pub method: String,
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RpcResponse {
    pub connection: NodeDescriptor,
    pub result: String,
}

/// Error body `{"error": ...}` with a status per failure class.
pub struct RpcError {
    status: StatusCode,
    message: String,
}

impl RpcError {
    fn dropped() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "request dropped without a response".to_string(),
        }
    }
}

impl From<PoolError> for RpcError {
    fn from(err: PoolError) -> Self {
        Self {
            status: status_for(&err),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn status_for(err: &PoolError) -> StatusCode {
    match err {
        PoolError::BadKey(_) | PoolError::BadPermission(_) => StatusCode::BAD_REQUEST,
        PoolError::BadAuthData(_) | PoolError::Handshake(_) => StatusCode::BAD_GATEWAY,
        PoolError::TooManyConnections => StatusCode::SERVICE_UNAVAILABLE,
        PoolError::InvalidPayload(_) | PoolError::Rpc(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /rpc - Execute one method against the node behind the descriptor.
pub async fn rpc_handler(
    State(state): State<AppState>,
    Json(request): Json<RpcRequest>,
) -> Result<Json<RpcResponse>, RpcError> {
    info!(method = %request.method, "incoming rpc request");
    if state.unsafe_log {
        debug!(connection = ?request.connection, payload = %request.payload, "full request");
    }

    let (action, reply) = Action::new(request.method, request.payload);
    state.pool.execute(&request.connection, action).await;

    match reply.await {
        Ok(Ok(response)) => {
            debug!(result = %response.result, "rpc response");
            record_rpc_metric("ok");
            Ok(Json(RpcResponse {
                connection: response.descriptor,
                result: response.result,
            }))
        }
        Ok(Err(err)) => {
            warn!(error = %err, "rpc request failed");
            record_rpc_metric("error");
            Err(RpcError::from(err))
        }
        Err(_) => {
            warn!("rpc request dropped without a response");
            record_rpc_metric("dropped");
            Err(RpcError::dropped())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    active_sessions: usize,
}

/// GET /health - Liveness probe.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        active_sessions: state.pool.session_count(),
    })
}

/// GET /metrics - Prometheus scrape endpoint.
pub async fn metrics_handler(
    State(handle): State<metrics_exporter_prometheus::PrometheusHandle>,
) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

/// Bearer-token gate. An empty configured token leaves the daemon open.
pub async fn require_bearer(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.auth_token.is_empty() {
        return next.run(request).await;
    }

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token == state.auth_token)
        .unwrap_or(false);

    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response()
    }
}

/// Feeds the stats reporter into the Prometheus gauge on top of the default
/// log line.
pub struct GaugeStats;

impl StatsObserver for GaugeStats {
    fn record(&self, stats: PoolStats) {
        gauge!("lndock_active_sessions", stats.active_sessions as f64);
        LogStats.record(stats);
    }
}

fn record_rpc_metric(outcome: &'static str) {
    counter!("lndock_rpc_requests_total", 1, "outcome" => outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use lndock_core::{
        loopback::LoopbackMailbox, MethodRegistry, PoolConfig, TransportError,
    };
    use std::sync::Arc;

    fn state(mailbox: Arc<LoopbackMailbox>) -> AppState {
        let registry = Arc::new(MethodRegistry::builder().passthrough("echo").build());
        AppState {
            pool: SessionPool::new(mailbox, registry, PoolConfig::default()),
            auth_token: String::new(),
            unsafe_log: false,
        }
    }

    fn envelope(method: &str, payload: &str) -> RpcRequest {
        serde_json::from_value(json!({
            "Connection": {
                "Mailbox": "wss://relay.example",
                "PairingPhrase": "a b c d",
                "LocalKey": "",
                "RemoteKey": ""
            },
            "Method": method,
            "Payload": payload,
        }))
        .unwrap()
    }

    #[test]
    fn envelope_parses_pascal_case_fields() {
        let request = envelope("echo", r#"{"v":1}"#);
        assert_eq!(request.method, "echo");
        assert_eq!(request.payload, r#"{"v":1}"#);
        assert_eq!(request.connection.mailbox, "wss://relay.example");
    }

    #[test]
    fn status_codes_follow_the_failure_class() {
        assert_eq!(
            status_for(&PoolError::BadKey("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&PoolError::BadAuthData("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&PoolError::Handshake(TransportError::StreamClosed)),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&PoolError::TooManyConnections),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&PoolError::Rpc("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn rpc_handler_round_trips_an_echo() {
        let state = state(Arc::new(LoopbackMailbox::new()));
        let request = envelope("echo", r#"{"v":1}"#);

        let Json(response) = rpc_handler(State(state), Json(request)).await.ok().unwrap();
        assert_eq!(response.result, r#"{"v":1}"#);
        assert_eq!(response.connection.local_key.len(), 64);
        assert_eq!(response.connection.status, "Connected");
    }

    #[tokio::test]
    async fn rpc_handler_maps_handshake_failures() {
        let state = state(Arc::new(LoopbackMailbox::with_auth_data(
            &b"NotAMacaroon: deadbeef"[..],
        )));
        let request = envelope("echo", "{}");

        let err = rpc_handler(State(state), Json(request))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn rpc_handler_reports_dropped_unknown_methods() {
        let state = state(Arc::new(LoopbackMailbox::new()));
        let request = envelope("no-such-method", "{}");

        let err = rpc_handler(State(state), Json(request))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.message.contains("dropped"));
    }
}
