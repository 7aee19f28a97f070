//! Tool host: REST API plus MCP endpoint.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | Registered tools with parameter schemas |
//! | `POST` | `/tools/{name}` | Call a tool; body is the argument object |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `*`    | `/mcp` | MCP streamable HTTP (`list_tools` / `call_tool`) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "missing required parameter: achievement" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `tool_error` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use focus_coach_core::store::ChunkStore;
use focus_coach_core::tools::ToolDescriptor;

use crate::config::Config;
use crate::embedding;
use crate::mcp::McpBridge;
use crate::traits::{is_param_error, ToolContext, ToolRegistry};

#[derive(Clone)]
struct AppState {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

/// Serve the built-in tools on `[server].bind` until Ctrl-C.
pub async fn run_server(config: &Config, store: Arc<dyn ChunkStore>) -> anyhow::Result<()> {
    let embedder = embedding::create_embedder(&config.embedding)?;
    let ctx = ToolContext::new(Arc::new(config.clone()), store).with_embedder(embedder);
    let tools = Arc::new(ToolRegistry::with_builtins()?);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("Tool host listening on http://{}", listener.local_addr()?);
    for t in tools.tools() {
        println!("  POST /tools/{}  {}", t.name(), t.description());
    }
    println!("  MCP  /mcp");

    serve(listener, tools, ctx, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let ct = CancellationToken::new();
    let app = build_router(tools, ctx, &ct);
    info!(addr = %listener.local_addr()?, "tool host started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            ct.cancel();
        })
        .await?;

    info!("tool host stopped");
    Ok(())
}

/// REST routes plus the MCP service at `/mcp`.
pub fn build_router(tools: Arc<ToolRegistry>, ctx: ToolContext, ct: &CancellationToken) -> Router {
    let bridge = McpBridge::new(tools.clone(), ctx.clone());
    let mcp_service: StreamableHttpService<McpBridge, LocalSessionManager> =
        StreamableHttpService::new(
            move || Ok(bridge.clone()),
            Arc::new(LocalSessionManager::default()),
            StreamableHttpServerConfig {
                stateful_mode: true,
                sse_keep_alive: None,
                cancellation_token: ct.child_token(),
                ..Default::default()
            },
        );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .with_state(AppState { tools, ctx })
        .nest_service("/mcp", mcp_service)
        .layer(cors)
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
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn tool_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "tool_error".to_string(),
        message: message.into(),
    }
}

/// Parameter problems are the caller's fault; everything else is the tool's.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let msg = format!("{:#}", err);
    if is_param_error(&err) {
        bad_request(format!("{}: {}", tool_name, msg))
    } else {
        tool_error(format!("{}: {}", tool_name, msg))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolDescriptor>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.descriptors(),
    })
}

// ============ POST /tools/{name} ============

/// An empty body means no arguments.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let params = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(serde_json::Map::new())
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(v @ Value::Object(_)) => v,
            Ok(_) => return Err(bad_request("request body must be a JSON object")),
            Err(e) => return Err(bad_request(format!("invalid JSON body: {}", e))),
        }
    };

    let result = tool.execute(params, &state.ctx).await.map_err(|e| {
        warn!(tool = %name, error = %format!("{:#}", e), "tool call failed");
        classify_tool_error(&name, e)
    })?;

    Ok(Json(serde_json::json!({ "result": result })))
}
