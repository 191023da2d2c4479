use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    error::ScanError,
    probe,
    scanner::Scanner,
    types::{ScanMode, ScanTarget},
};

pub const DEFAULT_HOST: &str = "localhost";

#[derive(Clone)]
pub struct AppState {
    scanner: Scanner,
}

impl AppState {
    pub fn new(scanner: Scanner) -> Self {
        Self { scanner }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub mode: Option<ScanMode>,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PortsQuery {
    #[serde(default)]
    pub mode: Option<ScanMode>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HealthQuery {
    #[serde(default)]
    pub host: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, err: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

impl IntoResponse for ScanError {
    fn into_response(self) -> Response {
        let status = match &self {
            ScanError::AlreadyScanning => StatusCode::CONFLICT,
            ScanError::InvalidConcurrency { .. } | ScanError::InvalidHost(_) => {
                StatusCode::BAD_REQUEST
            }
        };
        error_response(status, self)
    }
}

/// Routes of the JSON API, without binding a socket.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/scan", post(post_scan))
        .route("/status", get(get_status))
        .route("/results", get(get_results).delete(delete_results))
        .route("/ports", get(get_ports))
        .route("/catalog/{port}", get(get_catalog_entry))
        .route("/health/{port}", get(get_health))
        .with_state(state);

    Router::new().nest("/api", api).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}

/// Serve the API on `bind` until `shutdown` is cancelled.
pub async fn spawn_server(bind: &str, scanner: Scanner, shutdown: CancellationToken) -> Result<()> {
    let app = router(AppState::new(scanner));
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "serving scan API");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn post_scan(State(app): State<AppState>, body: Bytes) -> Response {
    let req: ScanRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ScanRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid scan request: {e}")),
        }
    };
    let host = req.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let mode = req.mode.unwrap_or_default();
    let concurrency = req.concurrency.unwrap_or(app.scanner.config().concurrency);

    match app.scanner.start_scan(&host, mode, concurrency) {
        // The join handle is dropped; the scan keeps running detached.
        Ok(_handle) => (StatusCode::ACCEPTED, Json(app.scanner.status().await)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    Json(app.scanner.status().await)
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    Json(app.scanner.results().await)
}

async fn delete_results(State(app): State<AppState>) -> impl IntoResponse {
    app.scanner.clear_results().await;
    StatusCode::NO_CONTENT
}

async fn get_ports(State(app): State<AppState>, Query(q): Query<PortsQuery>) -> impl IntoResponse {
    Json(app.scanner.catalog().candidate_ports(q.mode.unwrap_or_default()))
}

async fn get_catalog_entry(State(app): State<AppState>, Path(port): Path<u16>) -> Response {
    match app.scanner.catalog().lookup(port) {
        Some(entry) => Json(entry.clone()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("port {port} is not in the catalog")),
    }
}

async fn get_health(
    State(app): State<AppState>,
    Path(port): Path<u16>,
    Query(q): Query<HealthQuery>,
) -> Response {
    let host = q.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    if let Err(e) = crate::config::validate_host(&host) {
        return e.into_response();
    }
    let url = format!("{}/", ScanTarget::new(host, port).url());
    let report = probe::check_health(
        app.scanner.fetcher(),
        &url,
        app.scanner.config().probe_timeout,
    )
    .await;
    Json(report).into_response()
}
