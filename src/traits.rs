//! Tool capability layer.
//!
//! A [`Tool`] is a named, typed handler with a JSON-Schema parameter
//! description. Tools live in a [`ToolRegistry`], which validates each one
//! when it is registered: an empty name, a non-object schema, or a name
//! already taken is rejected there, not discovered at call time.
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │              ToolRegistry              │
//! │  search_focus_strategy  add_tada_...   │
//! │  get_weather_impact     estimate_...   │
//! │  pick_random_task       (custom)       │
//! └──────────────┬─────────────────────────┘
//!                ▼
//!   LocalTransport / REST host / MCP bridge
//! ```
//!
//! # Usage
//!
//! ```rust
//! use focus_coach::traits::ToolRegistry;
//!
//! let tools = ToolRegistry::with_builtins().unwrap();
//! assert!(tools.find("search_focus_strategy").is_some());
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use focus_coach_core::store::ChunkStore;
use focus_coach_core::tools::{RegistryError, ToolDescriptor};

use crate::builtin_tools::{
    AddTadaListItemTool, EstimateFocusSessionsTool, GetWeatherImpactTool, PickRandomTaskTool,
    SearchFocusStrategyTool,
};
use crate::config::Config;
use crate::embedding::Embedder;

/// A capability the model can invoke.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::{json, Value};
/// use focus_coach::traits::{Tool, ToolContext};
///
/// pub struct EchoTool;
///
/// #[async_trait]
/// impl Tool for EchoTool {
///     fn name(&self) -> &str { "echo" }
///     fn description(&self) -> &str { "Echo the input back" }
///     fn parameters_schema(&self) -> Value {
///         json!({ "type": "object", "properties": { "text": { "type": "string" } } })
///     }
///     async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
///         Ok(params["text"].clone())
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Identifier the model calls the tool by. Also the REST route
    /// (`POST /tools/{name}`).
    fn name(&self) -> &str;

    /// One-line description the model uses to decide when to call the tool.
    fn description(&self) -> &str;

    /// JSON Schema for the parameters; must have `type: "object"`.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. `params` is always a JSON object.
    ///
    /// A returned string is used verbatim as the tool result; any other
    /// value is pretty-printed.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// A tool rejecting its input, as opposed to failing at its own work.
///
/// Tools return it through `anyhow`; hosts find it with `downcast_ref` and
/// answer with a client error instead of a tool failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("missing required parameter: {0}")]
    Missing(&'static str),
    #[error("invalid parameters: {0}")]
    Invalid(String),
}

/// Whether `err` is a [`ParamError`], possibly under added context.
pub fn is_param_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ParamError>().is_some()
}

/// Dependencies handed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    config: Arc<Config>,
    store: Arc<dyn ChunkStore>,
    embedder: Option<Arc<dyn Embedder>>,
    http: reqwest::Client,
}

impl ToolContext {
    /// A context with keyword-only retrieval; see [`Self::with_embedder`].
    pub fn new(config: Arc<Config>, store: Arc<dyn ChunkStore>) -> Self {
        Self {
            config,
            store,
            embedder: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_embedder(mut self, embedder: Option<Arc<dyn Embedder>>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn embedder(&self) -> Option<&dyn Embedder> {
        self.embedder.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn ChunkStore {
        self.store.as_ref()
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

/// Render a tool's JSON result as tool-turn text.
pub fn render_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Name-to-handler lookup, in registration order.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// A registry holding the five built-in coach tools.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        let builtins: Vec<Box<dyn Tool>> = vec![
            Box::new(SearchFocusStrategyTool),
            Box::new(AddTadaListItemTool),
            Box::new(GetWeatherImpactTool),
            Box::new(EstimateFocusSessionsTool),
            Box::new(PickRandomTaskTool),
        ];
        for tool in builtins {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    /// Register a tool after validating its name and schema.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().trim();
        if name.is_empty() {
            return Err(RegistryError::MissingName);
        }
        match tool.parameters_schema() {
            Value::Object(_) => {}
            Value::Null => {
                return Err(RegistryError::MissingSchema {
                    name: name.to_string(),
                })
            }
            _ => {
                return Err(RegistryError::InvalidSchema {
                    name: name.to_string(),
                })
            }
        }
        if self.find(name).is_some() {
            return Err(RegistryError::Duplicate {
                name: name.to_string(),
            });
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Descriptors in registration order, as served by `GET /tools/list`.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|t| ToolDescriptor::new(t.name(), t.description(), t.parameters_schema()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed {
        name: &'static str,
        schema: Value,
    }

    #[async_trait]
    impl Tool for Fixed {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "fixed"
        }
        fn parameters_schema(&self) -> Value {
            self.schema.clone()
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<Value> {
            Ok(json!("ok"))
        }
    }

    fn fixed(name: &'static str, schema: Value) -> Box<dyn Tool> {
        Box::new(Fixed { name, schema })
    }

    #[test]
    fn test_builtins_registered_in_order() {
        let registry = ToolRegistry::with_builtins().unwrap();
        let names: Vec<&str> = registry.tools().iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "search_focus_strategy",
                "add_tada_list_item",
                "get_weather_impact",
                "estimate_focus_sessions",
                "pick_random_task"
            ]
        );
    }

    #[test]
    fn test_register_validates() {
        let mut registry = ToolRegistry::new();
        assert_eq!(
            registry.register(fixed("  ", json!({"type": "object"}))),
            Err(RegistryError::MissingName)
        );
        assert_eq!(
            registry.register(fixed("a", Value::Null)),
            Err(RegistryError::MissingSchema { name: "a".into() })
        );
        assert_eq!(
            registry.register(fixed("a", json!([]))),
            Err(RegistryError::InvalidSchema { name: "a".into() })
        );
        assert!(registry.register(fixed("a", json!({"type": "object"}))).is_ok());
        assert_eq!(
            registry.register(fixed("a", json!({"type": "object"}))),
            Err(RegistryError::Duplicate { name: "a".into() })
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_param_error_found_under_context() {
        let err = anyhow::Error::from(ParamError::Missing("location")).context("get_weather_impact");
        assert!(is_param_error(&err));
        assert!(format!("{:#}", err).contains("missing required parameter: location"));

        // Wording alone does not make a parameter error.
        let err = anyhow::anyhow!("disk must be mounted: missing required parameter");
        assert!(!is_param_error(&err));
    }

    #[test]
    fn test_render_result() {
        assert_eq!(render_result(&json!("plain")), "plain");
        assert_eq!(render_result(&json!({"a": 1})), "{\n  \"a\": 1\n}");
    }
}
