//! The coach's built-in tools.
//!
//! | Tool | Parameters | Effect |
//! |------|------------|--------|
//! | `search_focus_strategy` | `query` | Top-k strategies from the knowledge base |
//! | `add_tada_list_item` | `achievement` | Appends `- <achievement>` to the Ta-Da list |
//! | `get_weather_impact` | `location` | One-line weather report |
//! | `estimate_focus_sessions` | `task_minutes`, `session_minutes`, `break_minutes` | Session count and total time |
//! | `pick_random_task` | none | One line from the task list |
//!
//! Expected failures (network down, empty task list) come back as text so
//! the model can talk about them. Only bad parameters and local I/O errors
//! are returned as `Err`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use focus_coach_core::sanitize::sanitize;

use crate::retrieval;
use crate::traits::{ParamError, Tool, ToolContext};

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

/// Accepts JSON numbers and numeric strings; local models send both.
fn num_param(params: &Value, key: &str) -> Option<f64> {
    match params.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub struct SearchFocusStrategyTool;

#[async_trait]
impl Tool for SearchFocusStrategyTool {
    fn name(&self) -> &str {
        "search_focus_strategy"
    }

    fn description(&self) -> &str {
        "Search the knowledge base for focus and productivity strategies. Use this before giving any focus advice."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What the user needs help with"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = str_param(&params, "query").unwrap_or_default();
        let retrieval_cfg = &ctx.config().retrieval;
        let semantic = ctx
            .embedder()
            .map(|e| retrieval::Semantic::new(e, retrieval_cfg));
        let text = retrieval::search(
            ctx.store(),
            semantic,
            query,
            retrieval_cfg.top_k,
            &retrieval_cfg.no_results_message,
        )
        .await;
        Ok(Value::String(text))
    }
}

pub struct AddTadaListItemTool;

#[async_trait]
impl Tool for AddTadaListItemTool {
    fn name(&self) -> &str {
        "add_tada_list_item"
    }

    fn description(&self) -> &str {
        "Save something the user has accomplished to their Ta-Da list."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "achievement": {
                    "type": "string",
                    "description": "The accomplishment, in a few words"
                }
            },
            "required": ["achievement"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        // One entry per line.
        let achievement = sanitize(str_param(&params, "achievement").unwrap_or_default())
            .replace(['\r', '\n'], " ");
        let achievement = achievement.trim();
        if achievement.is_empty() {
            return Err(ParamError::Missing("achievement").into());
        }

        let path = &ctx.config().tools.tada_list;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(format!("- {}\n", achievement).as_bytes())
            .await?;
        file.flush().await?;

        Ok(Value::String(format!(
            "Achievement '{}' saved to Ta-Da list!",
            achievement
        )))
    }
}

/// `<base>/<location>?format=3`, with the location as one percent-encoded
/// path segment so `?`, `#` or `/` in it cannot change the request.
fn weather_request_url(base: &str, location: &str) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(base)
        .with_context(|| format!("invalid tools.weather_url '{}'", base))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("tools.weather_url '{}' cannot take a path", base))?
        .pop_if_empty()
        .push(location);
    url.query_pairs_mut().append_pair("format", "3");
    Ok(url)
}

pub struct GetWeatherImpactTool;

#[async_trait]
impl Tool for GetWeatherImpactTool {
    fn name(&self) -> &str {
        "get_weather_impact"
    }

    fn description(&self) -> &str {
        "Get the current weather for a location, to anticipate its effect on mood and energy. Only use when the user mentions the weather."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": { "type": "string", "description": "City name" }
            },
            "required": ["location"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let location = str_param(&params, "location").unwrap_or_default().trim();
        if location.is_empty() {
            return Err(ParamError::Missing("location").into());
        }

        let tools_cfg = &ctx.config().tools;
        let url = weather_request_url(&tools_cfg.weather_url, location)?;
        let response = ctx
            .http()
            .get(url)
            .timeout(std::time::Duration::from_secs(tools_cfg.timeout_secs))
            .send()
            .await;

        let text = match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) if !body.trim().is_empty() => sanitize(body.trim()),
                Ok(_) => format!("Weather for {} is unavailable right now.", location),
                Err(e) => format!("Weather for {} is unavailable right now ({}).", location, e),
            },
            Ok(resp) => format!(
                "Weather for {} is unavailable right now (HTTP {}).",
                location,
                resp.status().as_u16()
            ),
            Err(e) => format!("Weather for {} is unavailable right now ({}).", location, e),
        };
        Ok(Value::String(text))
    }
}

pub struct EstimateFocusSessionsTool;

/// Sessions needed for `task_minutes` and the wall-clock total including
/// the breaks between sessions.
pub fn estimate_sessions(task_minutes: f64, session_minutes: f64, break_minutes: f64) -> (u64, f64) {
    let sessions = (task_minutes / session_minutes).ceil().max(1.0) as u64;
    let total = task_minutes + (sessions - 1) as f64 * break_minutes;
    (sessions, total)
}

#[async_trait]
impl Tool for EstimateFocusSessionsTool {
    fn name(&self) -> &str {
        "estimate_focus_sessions"
    }

    fn description(&self) -> &str {
        "Estimate how many focus sessions (Pomodoros) a task needs and the total time including breaks."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_minutes": { "type": "number", "description": "Estimated task length in minutes" },
                "session_minutes": { "type": "number", "description": "Focus session length", "default": 25 },
                "break_minutes": { "type": "number", "description": "Break between sessions", "default": 5 }
            },
            "required": ["task_minutes"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let Some(task) = num_param(&params, "task_minutes") else {
            return Err(ParamError::Missing("task_minutes").into());
        };
        let session = num_param(&params, "session_minutes").unwrap_or(25.0);
        let pause = num_param(&params, "break_minutes").unwrap_or(5.0);
        if !(task > 0.0) || !(session > 0.0) || !(pause >= 0.0) {
            return Err(ParamError::Invalid(
                "task_minutes and session_minutes must be positive, break_minutes non-negative"
                    .to_string(),
            )
            .into());
        }

        let (sessions, total) = estimate_sessions(task, session, pause);
        Ok(json!({
            "sessions": sessions,
            "session_minutes": session,
            "break_minutes": pause,
            "total_minutes": total,
        }))
    }
}

pub struct PickRandomTaskTool;

#[async_trait]
impl Tool for PickRandomTaskTool {
    fn name(&self) -> &str {
        "pick_random_task"
    }

    fn description(&self) -> &str {
        "Pick one task at random from the user's task list, to beat choice paralysis."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = &ctx.config().tools.task_list;
        let content = match tokio::fs::read(path).await {
            Ok(bytes) => focus_coach_core::sanitize::sanitize_bytes(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Value::String(format!(
                    "No task list found at {}.",
                    path.display()
                )))
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        let tasks: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let picked = tasks.choose(&mut rand::thread_rng());
        Ok(Value::String(match picked {
            Some(task) => format!("Your next task: {}", task),
            None => "The task list is empty.".to_string(),
        }))
    }
}
