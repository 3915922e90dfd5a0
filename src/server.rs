//! HTTP trigger and catalog API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/start_parsing` | Start a batch over configured companies (202, runs in background) |
//! | `GET`  | `/reports?skip&limit` | Page through the catalog |
//! | `GET`  | `/reports/{ticker}` | All reports of one company |
//! | `POST` | `/reports` | Insert a catalog record by hand |
//!
//! Mutating endpoints require an `X-API-Key` header equal to the admin key
//! whenever one is configured (`server.admin_api_key` or `ADMIN_API_KEY`).
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unauthorized", "message": "missing or invalid X-API-Key" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `conflict` (409), `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::catalog::{Catalog, CreateOutcome, SqliteCatalog};
use crate::config::Config;
use crate::error::CatalogError;
use crate::models::CatalogRecord;
use crate::pipeline::Pipeline;
use crate::source::DisclosureSource;

/// Opens a fresh crawler session for each triggered batch.
pub type SourceFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn DisclosureSource>> + Send + Sync>;

const MAX_PAGE: i64 = 1000;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
    pub catalog: SqliteCatalog,
    pub sources: SourceFactory,
}

/// Build the router with CORS and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/start_parsing", post(handle_start_parsing))
        .route("/reports", get(handle_list_reports).post(handle_create_report))
        .route("/reports/{ticker}", get(handle_reports_by_ticker))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let app = router(state);

    tracing::info!("listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CatalogError> for AppError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::Rejected(msg) => AppError::new(StatusCode::BAD_REQUEST, "bad_request", msg),
            other => {
                tracing::error!(error = %other, "catalog query failed");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", other.to_string())
            }
        }
    }
}

fn check_api_key(config: &Config, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = config.server.admin_api_key.as_deref() else {
        return Ok(());
    };
    let given = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if given == Some(expected) {
        Ok(())
    } else {
        Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid X-API-Key",
        ))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /start_parsing ============

/// Accept the trigger and run the batch on a background task.
async fn handle_start_parsing(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    check_api_key(&state.config, &headers)?;

    let mut source = (state.sources)().map_err(|e| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            format!("cannot open disclosure source: {:#}", e),
        )
    })?;

    let pipeline = state.pipeline.clone();
    let config = state.config.clone();
    tokio::spawn(async move {
        let result = pipeline.run_batch(&config.companies, source.as_mut()).await;
        tracing::info!(
            processed = result.processed,
            saved = result.saved,
            errors = result.errors.len(),
            "triggered batch finished"
        );
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "message": "accepted" })),
    ))
}

// ============ GET /reports ============

#[derive(Deserialize)]
struct PageParams {
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Serialize)]
struct ReportList {
    #[serde(skip_serializing_if = "Option::is_none")]
    ticker: Option<String>,
    reports: Vec<CatalogRecord>,
    total: usize,
}

impl ReportList {
    fn new(ticker: Option<String>, reports: Vec<CatalogRecord>) -> Self {
        Self {
            ticker,
            total: reports.len(),
            reports,
        }
    }
}

async fn handle_list_reports(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> Result<Json<ReportList>, AppError> {
    if page.skip < 0 || page.limit < 1 || page.limit > MAX_PAGE {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            format!("skip must be >= 0 and limit within 1..={}", MAX_PAGE),
        ));
    }
    let reports = state.catalog.list(page.skip, page.limit).await?;
    Ok(Json(ReportList::new(None, reports)))
}

// ============ GET /reports/{ticker} ============

async fn handle_reports_by_ticker(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ReportList>, AppError> {
    let reports = state.catalog.list_by_ticker(&ticker).await?;
    Ok(Json(ReportList::new(Some(ticker), reports)))
}

// ============ POST /reports ============

#[derive(Deserialize)]
struct CreateReportRequest {
    ticker: String,
    year: i32,
    period: String,
    address: String,
}

async fn handle_create_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    check_api_key(&state.config, &headers)?;
    if req.ticker.trim().is_empty() || req.period.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "ticker and period must not be empty",
        ));
    }

    match state
        .catalog
        .create(&req.ticker, req.year, &req.period, &req.address)
        .await?
    {
        CreateOutcome::Created(record) => Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({
                "message": "Report created successfully",
                "report_id": record.id,
            })),
        )),
        CreateOutcome::AlreadyExists => Err(AppError::new(
            StatusCode::CONFLICT,
            "conflict",
            format!(
                "report already exists: {} {} {}",
                req.ticker, req.year, req.period
            ),
        )),
    }
}
