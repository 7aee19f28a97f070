//! Orchestration loop: drives one user turn to a final answer.
//!
//! ```text
//! AwaitingUserInput ──user text──▶ ModelPending ──no tool calls──▶ Done
//!                                      │                            ▲
//!                                  tool calls                       │
//!                                      ▼                            │
//!                                ToolExecution ──final answer (no tools)
//! ```
//!
//! Tool calls run strictly in the order the model listed them. A failing
//! or timed-out tool becomes tool-turn text for the model to react to; only
//! a failing or timed-out model call aborts the turn.
//!
//! The user message and the tool-call exchange are staged until every tool
//! has answered, then committed before the final model request. A failure
//! of the first model request leaves the transcript as it was before the
//! user message. A failure of the final request drops only the answer: the
//! tool turns stay, so a retry sees which side effects already happened.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use focus_coach_core::models::{ToolCall, Turn};
use focus_coach_core::tools::{adapt, ToolSpec};
use focus_coach_core::transcript::{Transcript, TranscriptError};

use crate::config::Config;
use crate::llm::{call_budget, ChatModel, ModelReply};
use crate::transport::ToolTransport;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a productivity coach who specializes in ADHD. Be patient, encouraging and clear. \
You have access to external tools and must follow these rules strictly:
1. When the user asks for advice or help to focus, you MUST first call 'search_focus_strategy' \
to consult the knowledge base. Do not invent strategies.
2. When the user tells you they have completed a task, you MUST call 'add_tada_list_item' to save it.
3. Only call 'get_weather_impact' if the user mentions the weather.
4. Use 'estimate_focus_sessions' when the user wants to plan how long a task will take, \
and 'pick_random_task' when they cannot decide what to do next.";

const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the loop is in the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingUserInput,
    ModelPending,
    ToolExecution,
    Done,
}

/// A turn that could not be completed. The failed model call left no turn
/// behind.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("model request failed: {0:#}")]
    Model(anyhow::Error),
    #[error("model did not answer within {}s", .0.as_secs())]
    ModelTimeout(Duration),
    #[error("transcript rejected a turn: {0}")]
    Transcript(#[from] TranscriptError),
}

pub struct CoachSession {
    model: Arc<dyn ChatModel>,
    transport: Arc<dyn ToolTransport>,
    transcript: Transcript,
    tools: Vec<ToolSpec>,
    state: LoopState,
    model_timeout: Duration,
    tool_timeout: Duration,
}

impl CoachSession {
    pub fn new(
        model: Arc<dyn ChatModel>,
        transport: Arc<dyn ToolTransport>,
        system_prompt: &str,
    ) -> Self {
        Self {
            model,
            transport,
            transcript: Transcript::with_system(system_prompt),
            tools: Vec::new(),
            state: LoopState::AwaitingUserInput,
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Session using the configured prompt and timeouts.
    pub fn from_config(
        config: &Config,
        model: Arc<dyn ChatModel>,
        transport: Arc<dyn ToolTransport>,
    ) -> Self {
        let prompt = config
            .agent
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        Self::new(model, transport, prompt).with_timeouts(
            call_budget(&config.model),
            Duration::from_secs(config.tools.timeout_secs),
        )
    }

    pub fn with_timeouts(mut self, model: Duration, tool: Duration) -> Self {
        self.model_timeout = model;
        self.tool_timeout = tool;
        self
    }

    /// Discover and adapt the transport's tools. Returns how many are usable.
    pub async fn start(&mut self) -> anyhow::Result<usize> {
        let descriptors = tokio::time::timeout(self.tool_timeout, self.transport.list_tools())
            .await
            .context("Timed out listing tools")?
            .context("Failed to list tools")?;

        let adapted = adapt(&descriptors);
        for dropped in &adapted.dropped {
            warn!(error = %dropped, "tool dropped");
        }
        if adapted.dropped_count() > 0 {
            warn!(dropped = adapted.dropped_count(), "some tools are unusable");
        }
        self.tools = adapted.specs;
        info!(tools = self.tools.len(), "session started");
        Ok(self.tools.len())
    }

    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run one user message to a final answer and return the answer.
    pub async fn run_turn(&mut self, text: &str) -> Result<String, TurnError> {
        let result = self.drive(text).await;
        if let Err(e) = &result {
            error!(error = %e, "turn failed");
        }
        self.state = LoopState::AwaitingUserInput;
        result
    }

    async fn drive(&mut self, text: &str) -> Result<String, TurnError> {
        let Self {
            model,
            transport,
            transcript,
            tools,
            state,
            model_timeout,
            tool_timeout,
        } = self;

        let mut stage = transcript.stage();
        stage.append(Turn::user(text))?;
        *state = LoopState::ModelPending;

        let offered = (!tools.is_empty()).then_some(tools.as_slice());
        let reply = call_model(&**model, *model_timeout, &stage.snapshot(), offered).await?;

        if reply.tool_calls.is_empty() {
            let answer = Turn::assistant(reply.content.as_deref().unwrap_or_default());
            let visible = answer.content().unwrap_or_default().to_string();
            stage.append(answer)?;
            *state = LoopState::Done;
            stage.commit();
            return Ok(visible);
        }

        let calls = normalize_call_ids(reply.tool_calls);
        stage.append(Turn::assistant_tool_calls(
            reply.content.as_deref(),
            calls.clone(),
        ))?;
        *state = LoopState::ToolExecution;

        for call in &calls {
            let arguments = decode_arguments(call.name(), call.arguments());
            let output = execute_call(&**transport, *tool_timeout, call.name(), arguments).await;
            stage.append(Turn::tool(call.id(), &output))?;
        }

        // The tools have run; their turns are history now.
        let committed = stage.commit();
        debug!(turns = committed, "tool exchange committed");

        *state = LoopState::ModelPending;
        let ModelReply { content, tool_calls } =
            call_model(&**model, *model_timeout, transcript.snapshot(), None).await?;
        if !tool_calls.is_empty() {
            debug!(ignored = tool_calls.len(), "tool calls in final answer ignored");
        }

        let answer = Turn::assistant(content.as_deref().unwrap_or_default());
        let visible = answer.content().unwrap_or_default().to_string();
        transcript.append(answer)?;
        *state = LoopState::Done;
        Ok(visible)
    }
}

async fn call_model(
    model: &dyn ChatModel,
    timeout: Duration,
    turns: &[Turn],
    tools: Option<&[ToolSpec]>,
) -> Result<ModelReply, TurnError> {
    match tokio::time::timeout(timeout, model.complete(turns, tools)).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => Err(TurnError::Model(e)),
        Err(_) => Err(TurnError::ModelTimeout(timeout)),
    }
}

/// Invoke one tool. Every failure is returned as text.
async fn execute_call(
    transport: &dyn ToolTransport,
    timeout: Duration,
    name: &str,
    arguments: Map<String, Value>,
) -> String {
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, transport.invoke(name, arguments)).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(text)) => {
            info!(tool = name, elapsed_ms, ok = true, "tool call");
            text
        }
        Ok(Err(e)) => {
            info!(tool = name, elapsed_ms, ok = false, "tool call");
            warn!(tool = name, error = %format!("{:#}", e), "tool failed");
            format!("Error: {:#}", e)
        }
        Err(_) => {
            warn!(tool = name, elapsed_ms, "tool timed out");
            format!(
                "Error: tool '{}' timed out after {}s",
                name,
                timeout.as_secs()
            )
        }
    }
}

/// Decode tool-call arguments into a map, never failing.
///
/// Blank text is an empty map. A JSON string holding an object (local
/// models often double-encode) is decoded once more. Anything else that is
/// not an object becomes an empty map.
pub fn decode_arguments(tool: &str, raw: &str) -> Map<String, Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(Value::String(inner)) => match serde_json::from_str::<Value>(&inner) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!(tool, "tool arguments are not an object, using {{}}");
                Map::new()
            }
        },
        Ok(_) => {
            warn!(tool, "tool arguments are not an object, using {{}}");
            Map::new()
        }
        Err(e) => {
            warn!(tool, error = %e, "malformed tool arguments, using {{}}");
            Map::new()
        }
    }
}

/// Give every call a non-empty id unique within the turn, so each tool
/// result can reference exactly one call.
pub fn normalize_call_ids(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen: HashSet<String> = HashSet::new();
    calls
        .into_iter()
        .enumerate()
        .map(|(i, call)| {
            if !call.id().trim().is_empty() && seen.insert(call.id().to_string()) {
                return call;
            }
            let mut id = format!("call_{}", i);
            let mut n = 1;
            while !seen.insert(id.clone()) {
                id = format!("call_{}_{}", i, n);
                n += 1;
            }
            ToolCall::new(&id, call.name(), call.arguments())
        })
        .collect()
}
