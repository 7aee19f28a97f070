//! Tool registry adapter.
//!
//! Translates tool descriptors discovered through a tool transport (name,
//! description, JSON-Schema parameters) into the function-calling shape the
//! chat model expects:
//!
//! ```json
//! { "type": "function",
//!   "function": { "name": "...", "description": "...", "parameters": { ... } } }
//! ```
//!
//! Descriptors without a name or without an object schema are dropped;
//! [`adapt`] reports them instead of failing the whole list.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while adapting or registering a tool.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool descriptor has no name")]
    MissingName,
    #[error("tool '{name}' has no parameter schema")]
    MissingSchema { name: String },
    #[error("tool '{name}' parameter schema must be a JSON object")]
    InvalidSchema { name: String },
    #[error("tool '{name}' is already registered")]
    Duplicate { name: String },
}

/// A tool as advertised by a tool host.
///
/// Every field is optional on the wire; [`adapt`] decides what is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "input_schema", alias = "inputSchema")]
    pub parameters: Option<Value>,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: Some(name.to_string()),
            description: Some(description.to_string()),
            parameters: Some(parameters),
        }
    }
}

/// Function description inside a [`ToolSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool offer in OpenAI function-calling format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

impl ToolSpec {
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Result of [`adapt`]: usable specs in input order plus what was dropped.
#[derive(Debug, Clone, Default)]
pub struct AdaptedTools {
    pub specs: Vec<ToolSpec>,
    pub dropped: Vec<RegistryError>,
}

impl AdaptedTools {
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }
}

/// Adapt a single descriptor.
pub fn adapt_one(descriptor: &ToolDescriptor) -> Result<ToolSpec, RegistryError> {
    let name = descriptor
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or(RegistryError::MissingName)?;

    let parameters = match &descriptor.parameters {
        None | Some(Value::Null) => {
            return Err(RegistryError::MissingSchema {
                name: name.to_string(),
            })
        }
        Some(schema @ Value::Object(_)) => schema.clone(),
        Some(_) => {
            return Err(RegistryError::InvalidSchema {
                name: name.to_string(),
            })
        }
    };

    Ok(ToolSpec {
        kind: "function".to_string(),
        function: FunctionSpec {
            name: name.to_string(),
            description: descriptor.description.clone().unwrap_or_default(),
            parameters,
        },
    })
}

/// Adapt a descriptor list one-to-one, preserving order.
pub fn adapt(descriptors: &[ToolDescriptor]) -> AdaptedTools {
    let mut adapted = AdaptedTools::default();
    for descriptor in descriptors {
        match adapt_one(descriptor) {
            Ok(spec) => adapted.specs.push(spec),
            Err(e) => adapted.dropped.push(e),
        }
    }
    adapted
}
