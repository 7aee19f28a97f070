//! Tool transports: how the orchestration loop reaches the tool host.
//!
//! [`LocalTransport`] runs tools in-process. [`HttpTransport`] talks to a
//! `coach serve` instance over the REST API:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `list_tools` | `GET /tools/list` |
//! | `invoke` | `POST /tools/{name}` with the argument object as body |

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use focus_coach_core::tools::ToolDescriptor;

use crate::config::Config;
use crate::embedding;
use crate::sqlite_store::SqliteStore;
use crate::traits::{render_result, ToolContext, ToolRegistry};

#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Tools the host offers, in the host's order.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Invoke `name` and return its result as text.
    async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<String>;
}

/// In-process transport over a [`ToolRegistry`].
pub struct LocalTransport {
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
}

impl LocalTransport {
    pub fn new(registry: Arc<ToolRegistry>, ctx: ToolContext) -> Self {
        Self { registry, ctx }
    }
}

#[async_trait]
impl ToolTransport for LocalTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        Ok(self.registry.descriptors())
    }

    async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<String> {
        let tool = self
            .registry
            .find(name)
            .ok_or_else(|| anyhow!("unknown tool: {}", name))?;

        let started = Instant::now();
        let result = tool.execute(Value::Object(arguments), &self.ctx).await;
        debug!(
            tool = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "tool invoked"
        );
        Ok(render_result(&result?))
    }
}

/// REST client for a remote tool host.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ListResponse {
    tools: Vec<ToolDescriptor>,
}

#[derive(Deserialize)]
struct CallResponse {
    result: Value,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn error_from(resp: reqwest::Response) -> anyhow::Error {
        let status = resp.status();
        match resp.json::<ErrorResponse>().await {
            Ok(body) => anyhow!("{} ({}): {}", status, body.error.code, body.error.message),
            Err(_) => anyhow!("tool host returned {}", status),
        }
    }
}

#[async_trait]
impl ToolTransport for HttpTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let url = format!("{}/tools/list", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach tool host at {}", url))?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let body: ListResponse = resp.json().await.context("Invalid tool list response")?;
        Ok(body.tools)
    }

    async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<String> {
        let url = format!("{}/tools/{}", self.base_url, name);
        let resp = self
            .client
            .post(&url)
            .json(&Value::Object(arguments))
            .send()
            .await
            .with_context(|| format!("Failed to reach tool host at {}", url))?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let body: CallResponse = resp.json().await.context("Invalid tool call response")?;
        Ok(render_result(&body.result))
    }
}

/// Build the transport selected by `[tools] transport`.
///
/// `local` opens the chunk store for the in-process tools; `http` only
/// needs the remote URL.
pub async fn connect(config: &Config) -> Result<Arc<dyn ToolTransport>> {
    match config.tools.transport.as_str() {
        "local" => {
            let store = SqliteStore::open(config).await?;
            let embedder = embedding::create_embedder(&config.embedding)?;
            let ctx = ToolContext::new(Arc::new(config.clone()), Arc::new(store))
                .with_embedder(embedder);
            Ok(Arc::new(LocalTransport::new(
                Arc::new(ToolRegistry::with_builtins()?),
                ctx,
            )))
        }
        "http" => {
            let Some(url) = config.tools.remote_url.as_deref() else {
                bail!("tools.remote_url must be set when tools.transport is 'http'");
            };
            Ok(Arc::new(HttpTransport::new(
                url,
                Duration::from_secs(config.tools.timeout_secs),
            )?))
        }
        other => bail!("Unknown tool transport: '{}'", other),
    }
}
