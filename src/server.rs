//! MCP server initialization for stdio and HTTP transports.
//!
//! Provides [`serve_stdio`] and [`serve_http`] entry points that wire up the
//! database, embedding provider, embedding worker, and MCP tool handler into a
//! running server. The HTTP transport also exposes the embedding job routes.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Request, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use rmcp::ServiceExt;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;

use crate::config::FamiliarConfig;
use crate::db;
use crate::embedding;
use crate::error::Error;
use crate::jobs::worker::{spawn_worker, JobSignal};
use crate::service::Services;
use crate::tools::request::Response as ToolResponse;
use crate::tools::FamiliarTools;

/// Shared setup: open DB, create embedding provider, start the embedding worker.
async fn setup_shared_state(config: FamiliarConfig) -> Result<(Services, JoinHandle<()>)> {
    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path)?;
    tracing::info!(db = %db_path.display(), "database ready");

    let embedding = embedding::load_provider(&config.embedding).await?;
    tracing::info!(model = embedding.model_name(), "embedding provider ready");

    if let Ok(Some(stored_model)) = db::migrations::get_embedding_model(&conn) {
        if stored_model != embedding.model_name() {
            tracing::warn!(
                stored = %stored_model,
                configured = embedding.model_name(),
                "embedding model changed, run `familiar backfill` to update all vectors"
            );
        }
    }

    let db: db::SharedConnection = Arc::new(std::sync::Mutex::new(conn));
    let signal = JobSignal::new();
    let worker = spawn_worker(
        Arc::clone(&db),
        Arc::clone(&embedding),
        config.jobs.clone(),
        signal.clone(),
    );

    let services = Services::new(db, embedding, Arc::new(config), signal);
    Ok((services, worker))
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: FamiliarConfig) -> Result<()> {
    tracing::info!("starting Familiar MCP server on stdio");

    let (services, worker) = setup_shared_state(config).await?;

    let tools = FamiliarTools::new(services);
    let server = tools.serve(rmcp::transport::stdio()).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    worker.abort();
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over Streamable HTTP, with the job routes alongside.
pub async fn serve_http(config: FamiliarConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting Familiar server on HTTP");

    let (services, worker) = setup_shared_state(config).await?;
    let app = router(services);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    worker.abort();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down HTTP server");
}

/// The HTTP application: `/mcp` plus the embedding job routes, all behind the
/// shared API key when one is configured.
pub fn router(services: Services) -> Router {
    let api_key: Option<Arc<str>> = services.config().server.api_key.as_deref().map(Arc::from);

    let mcp_services = services.clone();
    let mcp = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(FamiliarTools::new(mcp_services.clone())),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    Router::new()
        .nest_service("/mcp", mcp)
        .route("/jobs/message_embeddings", post(message_embeddings_job))
        .route("/jobs/memory_embeddings", post(memory_embeddings_job))
        .route("/chats/{chat_id}/embeddings", post(chat_embeddings_job))
        .layer(middleware::from_fn_with_state(api_key, require_api_key))
        .with_state(services)
}

// ── Auth ──────────────────────────────────────────────────────────────────────

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(bearer) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.trim());
    }
    headers.get("x-api-key").and_then(|v| v.to_str().ok())
}

async fn require_api_key(
    State(api_key): State<Option<Arc<str>>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = api_key else {
        return next.run(request).await;
    };

    let authorized = presented_key(request.headers())
        .map(|key| bool::from(key.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false);

    if authorized {
        next.run(request).await
    } else {
        tracing::warn!(path = %request.uri().path(), "rejected request without a valid API key");
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "unauthorized" })),
        )
            .into_response()
    }
}

// ── Job routes ────────────────────────────────────────────────────────────────

struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ConstraintViolation(_) => StatusCode::CONFLICT,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.0.to_string(), "kind": self.0.kind() });
        (status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageEmbeddingsJob {
    message_ids: Vec<String>,
}

fn accepted(queued: Option<usize>) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(ToolResponse::Accepted {
            accepted: true,
            queued,
        }),
    )
        .into_response()
}

async fn message_embeddings_job(
    State(services): State<Services>,
    Json(job): Json<MessageEmbeddingsJob>,
) -> Result<Response, ApiError> {
    let queued = services.enqueue_messages(job.message_ids).await?;
    Ok(accepted(Some(queued)))
}

async fn memory_embeddings_job(State(services): State<Services>) -> Response {
    services.start_backfill();
    accepted(None)
}

async fn chat_embeddings_job(
    State(services): State<Services>,
    Path(chat_id): Path<String>,
) -> Result<Response, ApiError> {
    let queued = services.enqueue_chat(chat_id).await?;
    Ok(accepted(Some(queued)))
}
