mod credentials;
mod ebay;
mod http;
mod idempotency;
mod jobs;
mod matching;
mod metrics;
mod models;
mod normalize;
mod reconcile;
mod security;
mod store;
mod supabase;
mod sync;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, PageSummary, PageSyncRequest, PreviewPage, StatusReport, SyncRequest, SyncSummary,
};
use security::{AuthContext, AuthState, require_api_auth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use sync::{SyncError, SyncService};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "sync.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let auth_state = AuthState::from_env();
    let service = SyncService::from_env();
    let (queue, _worker) = jobs::JobQueue::spawn(service.clone());
    let openapi: serde_json::Value = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prom recorder");
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|u| redis::Client::open(u).ok());
    let state = AppState {
        service,
        queue,
        openapi: Arc::new(openapi),
        idempotency: Arc::new(Mutex::new(HashMap::new())),
        prometheus_handle,
        redis,
    };
    let app = build_app(state, auth_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "sync.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn build_app(state: AppState, auth_state: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/sync", post(run_sync))
        .route("/sync/page", post(run_sync_page))
        .route("/listings/count", get(listings_count))
        .route("/listings/preview", get(listings_preview))
        .route("/status", get(account_status))
        .route("/credentials/{account_id}", delete(disconnect_account))
        .nest(
            "/jobs",
            Router::new()
                .route("/sync", post(enqueue_sync_job))
                .route("/{id}", get(get_job_status)),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .nest("/v1", protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()))
}

#[derive(Clone)]
struct AppState {
    service: SyncService,
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    idempotency: Arc<Mutex<HashMap<String, SyncSummary>>>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
///
/// Returns a small JSON payload with `status` and `service`.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "closet-sync-rs",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Unauthorized("docs key required"));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Listing Sync API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(axum::http::StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

/// Run a full marketplace sync for one account.
///
/// - Method: `POST`
/// - Path: `/v1/sync`
/// - Auth: `Authorization: Bearer <key>` or `X-Api-Key: <key>`
/// - Body: `SyncRequest`
/// - Response: `SyncSummary` (counters + per-stage transcript)
///
/// Honors `Idempotency-Key`: a repeated key replays the cached summary
/// instead of running the sync again.
async fn run_sync(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<SyncRequest>,
) -> Result<Json<SyncSummary>, AppError> {
    crate::metrics::inc_requests("/v1/sync");
    info!(
        target = "sync.api",
        api_key = %context.api_key_id,
        account_id = %payload.account_id,
        "sync requested",
    );

    if let Some(key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        if let Some(client) = &state.redis {
            if let Some(existing) = idempotency::redis_get(client, &key).await {
                return Ok(Json(existing));
            }
            let summary = state.service.run(payload).await?;
            let ttl = std::env::var("IDEMPOTENCY_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(3600);
            idempotency::redis_set(client, &key, &summary, ttl).await;
            return Ok(Json(summary));
        }
        if let Some(existing) = state.idempotency.lock().await.get(&key).cloned() {
            return Ok(Json(existing));
        }
        let summary = state.service.run(payload).await?;
        state.idempotency.lock().await.insert(key, summary.clone());
        return Ok(Json(summary));
    }

    let summary = state.service.run(payload).await?;
    Ok(Json(summary))
}

/// Import one `GetSellerList` page.
///
/// - Method: `POST`
/// - Path: `/v1/sync/page`
/// - Body: `PageSyncRequest`
async fn run_sync_page(
    State(state): State<AppState>,
    Json(payload): Json<PageSyncRequest>,
) -> Result<Json<PageSummary>, AppError> {
    crate::metrics::inc_requests("/v1/sync/page");
    let summary = state.service.run_page(payload).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct AccountQuery {
    account_id: String,
}

#[derive(Debug, Serialize)]
struct CountResponse {
    total: u64,
}

async fn listings_count(
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<CountResponse>, AppError> {
    crate::metrics::inc_requests("/v1/listings/count");
    let total = state.service.listing_count(&query.account_id).await?;
    Ok(Json(CountResponse { total }))
}

#[derive(Debug, Deserialize)]
struct PreviewQuery {
    account_id: String,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_preview_size")]
    page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_preview_size() -> u32 {
    sync::PREVIEW_DEFAULT_PAGE_SIZE
}

async fn listings_preview(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<PreviewPage>, AppError> {
    crate::metrics::inc_requests("/v1/listings/preview");
    let preview = state
        .service
        .preview(&query.account_id, query.page, query.page_size)
        .await?;
    Ok(Json(preview))
}

async fn account_status(
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<StatusReport>, AppError> {
    crate::metrics::inc_requests("/v1/status");
    let report = state.service.status(&query.account_id).await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
struct DisconnectResponse {
    disconnected: bool,
}

async fn disconnect_account(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<DisconnectResponse>, AppError> {
    crate::metrics::inc_requests("/v1/credentials");
    if state.service.disconnect(&account_id).await? {
        Ok(Json(DisconnectResponse { disconnected: true }))
    } else {
        Err(AppError::NotFound("credential"))
    }
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_sync_job(
    State(state): State<AppState>,
    Json(payload): Json<SyncRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/v1/jobs/sync");
    let id = state
        .queue
        .enqueue_sync(payload)
        .await
        .map_err(|err| AppError::Sync(SyncError::Internal(err.error)))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::Sync(SyncError::InvalidRequest(
            "invalid job id".to_string(),
        )));
    };
    if let Some(info) = state.queue.get(uuid).await {
        Ok(Json(info))
    } else {
        Err(AppError::NotFound("job"))
    }
}

#[derive(Debug)]
enum AppError {
    Sync(SyncError),
    NotFound(&'static str),
    Unauthorized(&'static str),
}

impl From<SyncError> for AppError {
    fn from(value: SyncError) -> Self {
        Self::Sync(value)
    }
}

fn error_code(err: &SyncError) -> &'static str {
    match err {
        SyncError::InvalidRequest(_) => "invalid_request",
        SyncError::AlreadyRunning(_) => "sync_in_progress",
        SyncError::NotConnected => "not_connected",
        SyncError::Protocol(_) => "upstream_error",
        SyncError::Aborted(_) => "sync_aborted",
        SyncError::Store(_) => "store_error",
        SyncError::Internal(_) => "internal_error",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, detail) = match &self {
            AppError::Sync(err) => {
                let status = match err {
                    SyncError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                    SyncError::AlreadyRunning(_) => StatusCode::CONFLICT,
                    SyncError::NotConnected => StatusCode::NOT_FOUND,
                    SyncError::Protocol(_) | SyncError::Aborted(_) => StatusCode::BAD_GATEWAY,
                    SyncError::Store(_) | SyncError::Internal(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, error_code(err), err.to_string())
            }
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{what} not found"),
            ),
            AppError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                (*message).to_string(),
            ),
        };
        let payload = ApiError {
            error: code.to_string(),
            detail: Some(detail),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
