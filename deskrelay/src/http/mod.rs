//! HTTP transport.
//!
//! `GET /health` is public. Every POST goes through bearer authentication
//! before its body is read: `/execute-encrypted` runs the bundle pipeline and
//! any other path is a primitive automation command.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use deskrelay_automation::{AutomationDriver, CommandDispatcher, ToolScriptDriver, UnavailableDriver};
use deskrelay_core::auth::BearerAuth;
use deskrelay_core::config::{AgentConfig, ExecutionConfig};
use deskrelay_core::observability;

pub const AGENT_NAME: &str = "DeskRelay Agent";

pub struct AppState {
    pub auth: BearerAuth,
    pub execution: ExecutionConfig,
    pub dispatcher: CommandDispatcher,
}

type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(auth: BearerAuth, execution: ExecutionConfig, driver: Arc<dyn AutomationDriver>) -> Self {
        let dispatcher = CommandDispatcher::new(driver, execution.clone());
        Self {
            auth,
            execution,
            dispatcher,
        }
    }
}

/// Unhandled failure: 500 with the error chain in `trace`.
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let trace = format!("{:?}", self.0);
        tracing::error!(error = %self.0, trace = %trace, "Request failed");
        let body = json!({
            "success": false,
            "error": self.0.to_string(),
            "trace": trace,
        });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub fn health_document() -> Value {
    json!({
        "status": "healthy",
        "agent": AGENT_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "mode": "pure_api_service",
        "local_generation": false,
    })
}

pub fn router(state: SharedState, max_body_bytes: usize) -> Router {
    let protected = Router::new()
        .route(
            "/execute-encrypted",
            post(execute_encrypted).fallback(not_found),
        )
        .fallback(primitive_command)
        .layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: AgentConfig) -> Result<()> {
    let api_key = config
        .server
        .api_key
        .clone()
        .context("DESKRELAY_API_KEY (or ENCRYPTION_KEY) must be set")?;

    let driver: Arc<dyn AutomationDriver> = match &config.tools_dir {
        Some(dir) => Arc::new(ToolScriptDriver::new(dir.clone(), config.execution.clone())),
        None => {
            tracing::warn!("No tools directory configured; pointer, keyboard and screen commands are unavailable");
            Arc::new(UnavailableDriver)
        }
    };
    let state = Arc::new(AppState::new(
        BearerAuth::new(api_key),
        config.execution.clone(),
        driver,
    ));
    let app = router(state.clone(), config.server.max_body_bytes);

    let addr = config.server.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(
        %addr,
        api_key = %config.server.masked_api_key(),
        driver = %state.dispatcher.driver_name(),
        interpreter = %config.execution.interpreter.display(),
        "Agent listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server failed")?;
    tracing::info!("Agent shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Rejects POSTs without the shared bearer credential before the body is read.
async fn require_bearer(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    if request.method() != Method::POST {
        return next.run(request).await;
    }
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    match state.auth.verify(header) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            let peer = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            tracing::debug!(reason = %e, "Bearer check failed");
            observability::audit_auth_rejected(request.uri().path(), &peer);
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "success": false, "error": "Unauthorized" })),
            )
                .into_response()
        }
    }
}

async fn health() -> Json<Value> {
    Json(health_document())
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn execute_encrypted(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let envelope: Value =
        serde_json::from_slice(&body).context("Request body is not valid JSON")?;
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("execute_encrypted", request_id = %request_id);
    let execution = state.execution.clone();

    let response = tokio::task::spawn_blocking(move || {
        let _guard = span.enter();
        deskrelay_sandbox::run_envelope(&envelope, &execution, &request_id).into_json()
    })
    .await
    .context("Execution worker panicked")?;
    Ok(Json(response))
}

async fn primitive_command(
    State(state): State<SharedState>,
    method: Method,
    body: Bytes,
) -> Result<Response, AppError> {
    if method != Method::POST {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let request: Value = serde_json::from_slice(&body).context("Request body is not valid JSON")?;
    let result = tokio::task::spawn_blocking(move || state.dispatcher.handle_request(&request))
        .await
        .context("Command worker panicked")??;
    Ok(Json(result).into_response())
}
