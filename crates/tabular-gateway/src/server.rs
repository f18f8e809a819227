//! Gateway server - control surface routes over the session manager
//!
//! POST /sessions                 multipart upload -> session id + events URL
//! POST /sessions/:id/stop        cooperative cancellation
//! GET  /sessions/:id/events      WebSocket event stream (replay + live)
//! GET  /sessions/:id/report      final report + images (terminal only)
//! GET  /sessions                 session listing
//! GET  /health                   liveness

use crate::ws::ws_handler;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tabular_agent::{DatasetUpload, SessionManager};
use tabular_core::{AgentError, RuntimeConfig};
use tabular_llm::OpenAiProvider;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub struct GatewayOptions {
    pub config: RuntimeConfig,
    pub bind: String,
    pub port: u16,
}

pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub started_at: std::time::Instant,
}

pub async fn start_gateway(options: GatewayOptions) -> anyhow::Result<()> {
    let config = Arc::new(options.config);
    let provider = OpenAiProvider::with_timeout(&config.llm_api_key, config.llm_timeout_seconds)
        .with_base_url(&config.llm_base_url);
    let manager = Arc::new(SessionManager::new(config.clone(), Arc::new(provider)));

    let state = Arc::new(AppState {
        manager,
        started_at: std::time::Instant::now(),
    });

    let app = Router::new()
        .route("/sessions", post(start_handler).get(list_handler))
        .route("/sessions/:id/stop", post(stop_handler))
        .route("/sessions/:id/events", get(ws_handler))
        .route("/sessions/:id/report", get(report_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(
            config.max_file_size_bytes as usize + 64 * 1024,
        ))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state);

    let bind_addr: SocketAddr = format!("{}:{}", options.bind, options.port).parse()?;

    info!("Tabular Agent gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  Events:  ws://{}/sessions/{{id}}/events", bind_addr);
    info!("  Model:   {} via {}", config.llm_model, config.llm_base_url);
    info!("  Uploads: {}", config.upload_dir.display());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Client-visible error with the taxonomy kind and an HTTP status.
pub struct ApiError(pub AgentError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            AgentError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AgentError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AgentError::UnknownSession(_) => StatusCode::NOT_FOUND,
            AgentError::SessionNotReady(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        }));
        (self.status(), body).into_response()
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        Self(e)
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /sessions - multipart fields: `file` (dataset), `request` (text),
/// optional `strategy`.
async fn start_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut upload: Option<DatasetUpload> = None;
    let mut request_text = String::new();
    let mut strategy: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AgentError::invalid_input(format!("malformed multipart body: {}", e)))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                let file_name = field.file_name().unwrap_or("dataset").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AgentError::invalid_input(format!("cannot read upload: {}", e)))?;
                upload = Some(DatasetUpload {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            "request" => {
                request_text = field.text().await.map_err(|e| {
                    AgentError::invalid_input(format!("cannot read request field: {}", e))
                })?;
            }
            "strategy" => {
                strategy = Some(field.text().await.map_err(|e| {
                    AgentError::invalid_input(format!("cannot read strategy field: {}", e))
                })?);
            }
            other => {
                info!("ignoring unknown multipart field '{}'", other);
            }
        }
    }

    let upload = upload.ok_or_else(|| AgentError::invalid_input("missing 'file' field"))?;
    let outcome = state
        .manager
        .start(upload, &request_text, strategy.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn stop_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    state.manager.stop(&id)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn report_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let artifacts = state.manager.fetch(&id).await?;
    Ok(Json(artifacts))
}

async fn list_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.manager.list().await)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.manager.session_count(),
        "tools": state.manager.tool_count(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
