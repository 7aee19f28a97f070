//! Model client: OpenAI-compatible chat completions with tool calling.
//!
//! Works against Ollama, llama.cpp server, vLLM, or OpenAI itself. The
//! response body passes through the sanitizer before JSON parsing: invalid
//! UTF-8 is dropped and `\uXXXX` escapes encoding a lone surrogate are
//! removed, so one bad code unit from a local model does not fail the turn.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use focus_coach_core::models::{Turn, ToolCall};
use focus_coach_core::sanitize::{sanitize_bytes, strip_lone_surrogate_escapes};
use focus_coach_core::tools::ToolSpec;

use crate::config::ModelConfig;

/// One model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelReply {
    pub fn text(content: &str) -> Self {
        Self {
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(content: Option<&str>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.map(str::to_string),
            tool_calls,
        }
    }
}

/// The model collaborator.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Exactly one completion for the transcript. `tools` is `None` when
    /// the model must answer in plain text.
    async fn complete(&self, turns: &[Turn], tools: Option<&[ToolSpec]>) -> Result<ModelReply>;
}

// ============ Wire format ============

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolSpec]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    arguments: &'a str,
}

fn to_wire(turn: &Turn) -> WireMessage<'_> {
    WireMessage {
        role: turn.role().as_str(),
        content: turn.content(),
        tool_calls: turn
            .tool_calls()
            .iter()
            .map(|c| WireToolCall {
                id: c.id(),
                kind: "function",
                function: WireFunction {
                    name: c.name(),
                    arguments: c.arguments(),
                },
            })
            .collect(),
        tool_call_id: turn.tool_call_id(),
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallOut>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallOut {
    #[serde(default)]
    id: Option<String>,
    function: FunctionOut,
}

#[derive(Debug, Deserialize)]
struct FunctionOut {
    #[serde(default)]
    name: String,
    /// A JSON-encoded string per the API; some servers send an object.
    #[serde(default)]
    arguments: Value,
}

/// Decode a raw response body into a [`ModelReply`].
pub fn parse_reply(body: &[u8]) -> Result<ModelReply> {
    let text = sanitize_bytes(body);
    let text = strip_lone_surrogate_escapes(&text);
    let parsed: ChatCompletionResponse =
        serde_json::from_str(&text).context("Invalid chat completion response")?;
    let message = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Chat completion response has no choices"))?
        .message;

    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let arguments = match tc.function.arguments {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            ToolCall::new(
                tc.id.as_deref().unwrap_or_default(),
                &tc.function.name,
                &arguments,
            )
        })
        .collect();

    Ok(ModelReply {
        content: message.content,
        tool_calls,
    })
}

// ============ Client ============

pub struct OpenAiChatClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiChatClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        let api_key = std::env::var(&config.api_key_env).unwrap_or_else(|_| "ollama".to_string());
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            max_retries: config.max_retries,
        })
    }
}

fn backoff(attempt: u32) -> Duration {
    // 1s, 2s, 4s, ... capped at 32s
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

/// Upper bound on one [`OpenAiChatClient::complete`] call: every attempt
/// timing out plus the backoff between attempts. Saturates instead of
/// overflowing.
pub fn call_budget(config: &ModelConfig) -> Duration {
    let retries = config.max_retries;
    let attempts = retries.saturating_add(1);
    // The first six retries wait 1, 2, 4, 8, 16, 32s; the rest 32s each.
    let doubling = retries.min(6);
    let sleeps = Duration::from_secs((1u64 << doubling) - 1)
        .saturating_add(Duration::from_secs(32).saturating_mul(retries - doubling));
    Duration::from_secs(config.timeout_secs)
        .saturating_mul(attempts)
        .saturating_add(sleeps)
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    async fn complete(&self, turns: &[Turn], tools: Option<&[ToolSpec]>) -> Result<ModelReply> {
        let tools = tools.filter(|t| !t.is_empty());
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: turns.iter().map(to_wire).collect(),
            tools,
            tool_choice: tools.map(|_| "auto"),
        };

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff(attempt);
                warn!(attempt, delay_secs = delay.as_secs(), "retrying model request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    let bytes = response.bytes().await;

                    if status.is_success() {
                        let bytes = bytes.context("Failed to read model response")?;
                        debug!(bytes = bytes.len(), "model response received");
                        return parse_reply(&bytes);
                    }

                    let body_text = bytes
                        .map(|b| sanitize_bytes(&b))
                        .unwrap_or_default();

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(status = status.as_u16(), "model request failed");
                        last_err = Some(anyhow!("Model API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("Model API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(error = %e, "model request failed");
                    last_err = Some(anyhow::Error::new(e).context(format!(
                        "Failed to reach model at {}",
                        self.endpoint
                    )));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Model request failed after retries")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use focus_coach_core::models::Role;

    #[test]
    fn test_parse_plain_reply() {
        let body = br#"{"choices":[{"message":{"role":"assistant","content":"Hi!"}}]}"#;
        let reply = parse_reply(body).unwrap();
        assert_eq!(reply.content.as_deref(), Some("Hi!"));
        assert!(reply.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_tool_calls_string_and_object_arguments() {
        let body = br#"{"choices":[{"message":{"content":null,"tool_calls":[
            {"id":"c1","type":"function","function":{"name":"a","arguments":"{\"x\":1}"}},
            {"id":"c2","type":"function","function":{"name":"b","arguments":{"y":2}}}
        ]}}]}"#;
        let reply = parse_reply(body).unwrap();
        assert_eq!(reply.content, None);
        assert_eq!(reply.tool_calls[0].arguments(), "{\"x\":1}");
        assert_eq!(reply.tool_calls[1].name(), "b");
        assert_eq!(reply.tool_calls[1].arguments(), "{\"y\":2}");
    }

    #[test]
    fn test_parse_survives_lone_surrogate_and_bad_bytes() {
        let mut body = br#"{"choices":[{"message":{"content":"ok \uD83D done"#.to_vec();
        body.push(0xff);
        body.extend_from_slice(br#""}}]}"#);
        let reply = parse_reply(&body).unwrap();
        assert_eq!(reply.content.as_deref(), Some("ok  done"));
    }

    #[test]
    fn test_parse_no_choices_is_error() {
        assert!(parse_reply(br#"{"choices":[]}"#).is_err());
    }

    #[test]
    fn test_wire_format_for_tool_turns() {
        let call = ToolCall::new("c1", "add_tada_list_item", "{}");
        let turn = Turn::assistant_tool_calls(None, vec![call]);
        let v = serde_json::to_value(to_wire(&turn)).unwrap();
        assert_eq!(v["role"], "assistant");
        assert!(v["content"].is_null());
        assert_eq!(v["tool_calls"][0]["type"], "function");
        assert_eq!(v["tool_calls"][0]["function"]["name"], "add_tada_list_item");

        let result = Turn::tool("c1", "saved");
        assert_eq!(result.role(), Role::Tool);
        let v = serde_json::to_value(to_wire(&result)).unwrap();
        assert_eq!(v["tool_call_id"], "c1");
        assert!(v.get("tool_calls").is_none());
    }

    #[test]
    fn test_call_budget_counts_retries() {
        let cfg = ModelConfig {
            timeout_secs: 10,
            max_retries: 2,
            ..ModelConfig::default()
        };
        assert_eq!(call_budget(&cfg), Duration::from_secs(10 * 3 + 1 + 2));

        let cfg = ModelConfig {
            timeout_secs: 1,
            max_retries: 8,
            ..ModelConfig::default()
        };
        assert_eq!(
            call_budget(&cfg),
            Duration::from_secs(9 + (1 + 2 + 4 + 8 + 16 + 32) + 32 + 32)
        );
    }

    #[test]
    fn test_call_budget_saturates_on_extreme_config() {
        let cfg = ModelConfig {
            timeout_secs: u64::MAX,
            max_retries: u32::MAX,
            ..ModelConfig::default()
        };
        assert_eq!(call_budget(&cfg), Duration::MAX);

        let cfg = ModelConfig {
            timeout_secs: 1,
            max_retries: u32::MAX,
            ..ModelConfig::default()
        };
        assert!(call_budget(&cfg) > Duration::from_secs(u32::MAX as u64));
    }
}
