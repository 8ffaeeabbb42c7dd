//! HTTP front end for the query cache
//!
//! # Routes
//!
//! - `GET /` - Health check
//! - `GET /api/v1/irctc/search-train?source=&destination=&hours=` - Route search
//! - `GET /api/v1/irctc/live-train-status?trainNumber=&startDay=` - Live running status
//! - `GET /api/v1/irctc/pnr-status/{pnr}` - Booking status
//! - `GET /api/v1/irctc/train-schedule/{trainNumber}` - Train schedule
//! - `GET /metrics` - Prometheus metrics
//!
//! Successful query responses carry the upstream body verbatim plus an
//! `x-cache` header (`HIT`, `MISS` or `STALE`). Failures use
//! `{"success": false, "error": "..."}`.
//!
//! Browsers are allowed in through CORS: the configured frontend origin
//! with credentials, or any origin without credentials when none is set.

use crate::query::{QueryCache, QueryOutcome};
use crate::{metrics, RailProxyError};
use axum::{
    body::Body,
    extract::{Path, Query as QueryParams, State},
    http::{header, HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rail_query::{Query, QueryKind};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Header reporting how a query was answered
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Shared server state
struct AppState {
    query_cache: QueryCache,
}

/// HTTP server wrapping a [`QueryCache`]
pub struct ProxyServer {
    state: Arc<AppState>,
    cors: CorsLayer,
}

impl ProxyServer {
    /// Server accepting cross-origin requests from any origin
    pub fn new(query_cache: QueryCache) -> Self {
        Self {
            state: Arc::new(AppState { query_cache }),
            cors: permissive_cors(),
        }
    }

    /// Restrict CORS to one frontend origin, or open it to any origin
    /// when `origin` is `None`
    pub fn with_frontend_origin(mut self, origin: Option<&str>) -> crate::Result<Self> {
        self.cors = cors_layer(origin)?;
        Ok(self)
    }

    /// Router for this server, for embedding or in-process requests
    pub fn router(&self) -> Router {
        Self::build_router(self.state.clone(), self.cors.clone())
    }

    fn build_router(state: Arc<AppState>, cors: CorsLayer) -> Router {
        Router::new()
            .route("/", get(health))
            .route("/metrics", get(metrics_handler))
            .route("/api/v1/irctc/search-train", get(search_train))
            .route("/api/v1/irctc/live-train-status", get(live_train_status))
            .route("/api/v1/irctc/pnr-status/{pnr}", get(pnr_status))
            .route("/api/v1/irctc/train-schedule/{train_number}", get(train_schedule))
            .fallback(not_found)
            .layer(cors)
            .layer(middleware::from_fn(log_requests))
            .with_state(state)
    }

    /// Run the server until Ctrl-C or SIGTERM, then close the cache store
    pub async fn run(self, addr: &str) -> crate::Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RailProxyError::Server(format!("failed to bind {}: {}", addr, e)))?;

        tracing::info!(addr = addr, "railproxy listening");

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| RailProxyError::Server(e.to_string()));

        tracing::info!("Shutting down, closing cache store");
        let closed = self.state.query_cache.close().await;

        served?;
        closed
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// CORS for a single frontend origin, sent with credentials
///
/// Without an origin every site may call the API, but credentials are not
/// allowed since a wildcard origin cannot carry them.
pub fn cors_layer(origin: Option<&str>) -> crate::Result<CorsLayer> {
    let Some(origin) = origin else {
        return Ok(permissive_cors());
    };
    let origin = HeaderValue::from_str(origin.trim_end_matches('/')).map_err(|_| {
        RailProxyError::Config(format!("frontend origin '{}' is not a valid header value", origin))
    })?;

    Ok(base_cors()
        .allow_origin(AllowOrigin::exact(origin))
        .allow_credentials(true))
}

fn permissive_cors() -> CorsLayer {
    base_cors().allow_origin(Any)
}

fn base_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([HeaderName::from_static(CACHE_STATUS_HEADER)])
}

/// Request logging middleware
async fn log_requests(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request"
    );

    response
}

// ============================================================================
// Request/Response types
// ============================================================================

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub message: String,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

/// Map a query failure to a status and caller-safe body
fn error_response(err: RailProxyError) -> HandlerError {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let message = if err.is_caller_facing() {
        err.to_string()
    } else {
        tracing::error!(error = %err, kind = err.kind_label(), "Query failed");
        "Internal Server Error".to_string()
    };

    (status, Json(ErrorResponse::new(message)))
}

fn outcome_response(outcome: QueryOutcome) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (
                header::HeaderName::from_static(CACHE_STATUS_HEADER),
                HeaderValue::from_static(outcome.status.as_str()),
            ),
        ],
        outcome.payload.as_str().to_string(),
    )
        .into_response()
}

async fn answer(state: &AppState, query: Query) -> Result<Response, HandlerError> {
    state
        .query_cache
        .execute(&query)
        .await
        .map(outcome_response)
        .map_err(error_response)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        success: true,
        message: "Server is running!".to_string(),
    })
}

async fn metrics_handler() -> Result<impl IntoResponse, HandlerError> {
    let body = metrics::encode_metrics().map_err(error_response)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

async fn search_train(
    State(state): State<Arc<AppState>>,
    QueryParams(params): QueryParams<HashMap<String, String>>,
) -> Result<Response, HandlerError> {
    answer(&state, Query::from_params(QueryKind::RouteSearch, params)).await
}

async fn live_train_status(
    State(state): State<Arc<AppState>>,
    QueryParams(params): QueryParams<HashMap<String, String>>,
) -> Result<Response, HandlerError> {
    answer(&state, Query::from_params(QueryKind::LiveStatus, params)).await
}

async fn pnr_status(
    State(state): State<Arc<AppState>>,
    Path(pnr): Path<String>,
) -> Result<Response, HandlerError> {
    answer(&state, Query::pnr_status(pnr)).await
}

async fn train_schedule(
    State(state): State<Arc<AppState>>,
    Path(train_number): Path<String>,
) -> Result<Response, HandlerError> {
    answer(&state, Query::schedule(train_number)).await
}

async fn not_found() -> HandlerError {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new("Not Found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Payload, SqliteStore};
    use crate::upstream::{Fetcher, UpstreamError, UpstreamRequest};
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    /// Answers every kind with an echo of its parameters; PNR 6351738552 is
    /// reported as flushed and train 99999 fails upstream
    #[derive(Default)]
    struct EchoFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for EchoFetcher {
        async fn fetch(&self, request: &UpstreamRequest) -> Result<Payload, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let params: HashMap<&str, &str> = request
                .params
                .iter()
                .map(|(k, v)| (*k, v.as_str()))
                .collect();
            if params.get("pnr") == Some(&"6351738552") {
                return Err(UpstreamError::not_found("Flushed PNR /PNR not yet generated"));
            }
            if params.get("trainNumber") == Some(&"99999") {
                return Err(UpstreamError::with_status(500, "provider exploded"));
            }
            Ok(Payload::from_value(&json!({
                "success": true,
                "trainCount": 1,
                "kind": request.kind.as_str(),
                "params": params,
            })))
        }
    }

    fn create_test_server() -> (ProxyServer, Arc<EchoFetcher>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let fetcher = Arc::new(EchoFetcher::default());
        let server = ProxyServer::new(QueryCache::new(store, fetcher.clone()));
        (server, fetcher)
    }

    async fn get_request(app: Router, uri: &str) -> (StatusCode, Option<String>, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let cache = response
            .headers()
            .get(CACHE_STATUS_HEADER)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, cache, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (server, _) = create_test_server();
        let (status, _, body) = get_request(server.router(), "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "message": "Server is running!"}));
    }

    #[tokio::test]
    async fn test_search_miss_then_hit() {
        let (server, fetcher) = create_test_server();
        let uri = "/api/v1/irctc/search-train?source=NDLS&destination=GKP&hours=8";

        let (status, cache, first) = get_request(server.router(), uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache.as_deref(), Some("MISS"));
        assert_eq!(first["trainCount"], 1);
        assert_eq!(first["params"]["destination"], "GKP");

        let (status, cache, second) = get_request(server.router(), uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache.as_deref(), Some("HIT"));
        assert_eq!(first, second);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_destination_is_400() {
        let (server, fetcher) = create_test_server();
        let (status, _, body) =
            get_request(server.router(), "/api/v1/irctc/search-train?source=NDLS&hours=8").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("destination"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_live_status_params() {
        let (server, _) = create_test_server();
        let (status, _, body) = get_request(
            server.router(),
            "/api/v1/irctc/live-train-status?trainNumber=12555&startDay=1",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "live_status");
        assert_eq!(body["params"]["startDay"], "1");
    }

    #[tokio::test]
    async fn test_pnr_not_found_is_404() {
        let (server, _) = create_test_server();
        let (status, _, body) =
            get_request(server.router(), "/api/v1/irctc/pnr-status/6351738552").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({"success": false, "error": "Flushed PNR /PNR not yet generated"})
        );
    }

    #[tokio::test]
    async fn test_schedule_path_param() {
        let (server, _) = create_test_server();
        let (status, _, body) =
            get_request(server.router(), "/api/v1/irctc/train-schedule/12555").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "schedule");
        assert_eq!(body["params"]["trainNumber"], "12555");
    }

    #[tokio::test]
    async fn test_upstream_failure_is_opaque_500() {
        let (server, _) = create_test_server();
        let (status, _, body) =
            get_request(server.router(), "/api/v1/irctc/train-schedule/99999").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"success": false, "error": "Internal Server Error"}));
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let (server, _) = create_test_server();
        let (status, _, body) = get_request(server.router(), "/api/v1/irctc/nope").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (server, _) = create_test_server();
        // Produce at least one sample
        get_request(server.router(), "/api/v1/irctc/train-schedule/12555").await;

        let response = server
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("railproxy_query_outcomes_total"));
    }

    async fn cors_request(app: Router, method: Method, origin: &str) -> Response {
        app.oneshot(
            Request::builder()
                .method(method)
                .uri("/api/v1/irctc/train-schedule/12555")
                .header(header::ORIGIN, origin)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_cors_any_origin_by_default() {
        let (server, _) = create_test_server();
        let response = cors_request(server.router(), Method::GET, "http://localhost:3000").await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());
        assert_eq!(headers[header::ACCESS_CONTROL_EXPOSE_HEADERS], CACHE_STATUS_HEADER);
    }

    #[tokio::test]
    async fn test_cors_configured_frontend_origin() {
        let (server, fetcher) = create_test_server();
        let server = server
            .with_frontend_origin(Some("https://trains.example.com"))
            .unwrap();

        let response =
            cors_request(server.router(), Method::GET, "https://trains.example.com").await;
        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://trains.example.com"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

        let response = cors_request(server.router(), Method::GET, "https://evil.example.com").await;
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());

        // Preflight is answered by the layer without touching the cache
        let before = fetcher.calls.load(Ordering::SeqCst);
        let response =
            cors_request(server.router(), Method::OPTIONS, "https://trains.example.com").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://trains.example.com"
        );
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), before);
    }

    #[test]
    fn test_invalid_frontend_origin_rejected() {
        assert!(matches!(
            cors_layer(Some("https://bad\norigin")),
            Err(RailProxyError::Config(_))
        ));
        assert!(cors_layer(None).is_ok());
    }
}
