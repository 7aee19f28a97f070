//! Orchestration loop against a scripted model and recording transports.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use focus_coach::agent::{CoachSession, LoopState, TurnError};
use focus_coach::config::Config;
use focus_coach::llm::{ChatModel, ModelReply};
use focus_coach::traits::{ToolContext, ToolRegistry};
use focus_coach::transport::{LocalTransport, ToolTransport};
use focus_coach_core::models::{Role, ToolCall, Turn};
use focus_coach_core::store::memory::InMemoryStore;
use focus_coach_core::tools::{ToolDescriptor, ToolSpec};

// ============ Fakes ============

/// Returns scripted replies in order and records what it was sent.
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ModelReply>>>,
    requests: Mutex<Vec<(Vec<Turn>, bool)>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<ModelReply>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<(Vec<Turn>, bool)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, turns: &[Turn], tools: Option<&[ToolSpec]>) -> Result<ModelReply> {
        self.requests
            .lock()
            .unwrap()
            .push((turns.to_vec(), tools.is_some()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("script exhausted")))
    }
}

/// Never answers.
struct HangingModel;

#[async_trait]
impl ChatModel for HangingModel {
    async fn complete(&self, _turns: &[Turn], _tools: Option<&[ToolSpec]>) -> Result<ModelReply> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

/// Records invocations; `fail` and `hang` tools misbehave on purpose.
#[derive(Default)]
struct RecordingTransport {
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

#[async_trait]
impl ToolTransport for RecordingTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let schema = json!({ "type": "object", "properties": {} });
        Ok(vec![
            ToolDescriptor::new("first", "first tool", schema.clone()),
            ToolDescriptor::new("second", "second tool", schema.clone()),
            ToolDescriptor::new("fail", "always fails", schema.clone()),
            ToolDescriptor::new("hang", "never returns", schema),
            ToolDescriptor {
                name: Some("broken".into()),
                description: None,
                parameters: None,
            },
        ])
    }

    async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        match name {
            "fail" => Err(anyhow!("connection refused")),
            "hang" => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            other => Ok(format!("{} done", other)),
        }
    }
}

fn call(id: &str, name: &str, args: &str) -> ToolCall {
    ToolCall::new(id, name, args)
}

async fn session(model: Arc<dyn ChatModel>, transport: Arc<dyn ToolTransport>) -> CoachSession {
    let mut s = CoachSession::new(model, transport, "You are a coach.")
        .with_timeouts(Duration::from_millis(500), Duration::from_millis(200));
    s.start().await.unwrap();
    s
}

// ============ Tests ============

#[tokio::test]
async fn test_start_drops_incomplete_descriptors() {
    let model = ScriptedModel::new(vec![]);
    let s = session(model, Arc::new(RecordingTransport::default())).await;
    let names: Vec<&str> = s.tools().iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["first", "second", "fail", "hang"]);
}

#[tokio::test]
async fn test_plain_answer_without_tools() {
    let model = ScriptedModel::new(vec![Ok(ModelReply::text("Hello! How can I help?"))]);
    let mut s = session(model.clone(), Arc::new(RecordingTransport::default())).await;

    let reply = s.run_turn("hi").await.unwrap();
    assert_eq!(reply, "Hello! How can I help?");
    assert_eq!(s.state(), LoopState::AwaitingUserInput);

    let roles: Vec<Role> = s.transcript().snapshot().iter().map(|t| t.role()).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);

    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].1, "tools offered on the first request");
}

#[tokio::test]
async fn test_tool_calls_run_in_order_before_final_answer() {
    let model = ScriptedModel::new(vec![
        Ok(ModelReply::with_tool_calls(
            None,
            vec![
                call("c1", "second", "{}"),
                call("c2", "first", "{}"),
                call("c3", "second", "{}"),
            ],
        )),
        Ok(ModelReply::text("All done.")),
    ]);
    let transport = Arc::new(RecordingTransport::default());
    let mut s = session(model.clone(), transport.clone()).await;

    assert_eq!(s.run_turn("go").await.unwrap(), "All done.");

    let order: Vec<String> = transport
        .calls
        .lock()
        .unwrap()
        .iter()
        .map(|(n, _)| n.clone())
        .collect();
    assert_eq!(order, vec!["second", "first", "second"]);

    let turns = s.transcript().snapshot();
    // system, user, assistant(tool calls), 3 x tool, assistant
    assert_eq!(turns.len(), 7);
    let tool_ids: Vec<&str> = turns[3..6].iter().filter_map(|t| t.tool_call_id()).collect();
    assert_eq!(tool_ids, vec!["c1", "c2", "c3"]);
    assert_eq!(turns[3].content(), Some("second done"));

    // The final request carries every tool turn and no tool offer.
    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    let (final_turns, offered) = &requests[1];
    assert!(!offered);
    assert_eq!(final_turns.iter().filter(|t| t.role() == Role::Tool).count(), 3);
}

#[tokio::test]
async fn test_malformed_arguments_become_empty_map() {
    let model = ScriptedModel::new(vec![
        Ok(ModelReply::with_tool_calls(
            Some("Let me check."),
            vec![call("c1", "first", "{\"query\": oops")],
        )),
        Ok(ModelReply::text("ok")),
    ]);
    let transport = Arc::new(RecordingTransport::default());
    let mut s = session(model, transport.clone()).await;

    assert_eq!(s.run_turn("x").await.unwrap(), "ok");
    let calls = transport.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1.is_empty());

    // The raw arguments are kept in the transcript as the model sent them.
    let assistant = &s.transcript().snapshot()[2];
    assert_eq!(assistant.content(), Some("Let me check."));
    assert_eq!(assistant.tool_calls()[0].arguments(), "{\"query\": oops");
}

#[tokio::test]
async fn test_tool_failure_and_timeout_are_data() {
    let model = ScriptedModel::new(vec![
        Ok(ModelReply::with_tool_calls(
            None,
            vec![call("c1", "fail", "{}"), call("c2", "hang", "{}")],
        )),
        Ok(ModelReply::text("Sorry, the tools are having trouble.")),
    ]);
    let mut s = session(model, Arc::new(RecordingTransport::default())).await;

    let reply = s.run_turn("x").await.unwrap();
    assert_eq!(reply, "Sorry, the tools are having trouble.");

    let turns = s.transcript().snapshot();
    assert!(turns[3].content().unwrap().contains("connection refused"));
    assert_eq!(
        turns[4].content(),
        Some("Error: tool 'hang' timed out after 0s")
    );
}

#[tokio::test]
async fn test_first_model_error_leaves_transcript_unchanged() {
    let model = ScriptedModel::new(vec![
        Ok(ModelReply::text("first answer")),
        Err(anyhow!("connection reset")),
        Ok(ModelReply::text("recovered")),
    ]);
    let mut s = session(model, Arc::new(RecordingTransport::default())).await;

    s.run_turn("one").await.unwrap();
    let before = s.transcript().snapshot().to_vec();

    let err = s.run_turn("two").await.unwrap_err();
    assert!(matches!(err, TurnError::Model(_)));
    assert_eq!(s.transcript().snapshot(), before.as_slice());
    assert_eq!(s.state(), LoopState::AwaitingUserInput);

    // The session keeps going.
    assert_eq!(s.run_turn("three").await.unwrap(), "recovered");
    assert_eq!(s.transcript().len(), before.len() + 2);
}

#[tokio::test]
async fn test_final_model_error_keeps_tool_turns() {
    let model = ScriptedModel::new(vec![
        Ok(ModelReply::text("first answer")),
        Ok(ModelReply::with_tool_calls(None, vec![call("c1", "first", "{}")])),
        Err(anyhow!("connection reset")),
        Ok(ModelReply::text("recovered")),
    ]);
    let transport = Arc::new(RecordingTransport::default());
    let mut s = session(model.clone(), transport.clone()).await;

    s.run_turn("one").await.unwrap();
    let before = s.transcript().len();

    // Fails on the final-answer request, after a tool already ran.
    let err = s.run_turn("two").await.unwrap_err();
    assert!(matches!(err, TurnError::Model(_)));
    assert_eq!(s.state(), LoopState::AwaitingUserInput);

    let turns = s.transcript().snapshot();
    // user, assistant(tool calls), tool; no final answer
    assert_eq!(turns.len(), before + 3);
    assert_eq!(turns[before].content(), Some("two"));
    assert_eq!(turns[before + 1].tool_calls().len(), 1);
    assert_eq!(turns[before + 2].tool_call_id(), Some("c1"));
    assert_eq!(turns[before + 2].content(), Some("first done"));

    // The next message is accepted and the model sees the earlier tool result.
    assert_eq!(s.run_turn("did it work?").await.unwrap(), "recovered");
    assert_eq!(transport.calls.lock().unwrap().len(), 1);
    let (last_turns, _) = model.requests().pop().unwrap();
    assert!(last_turns
        .iter()
        .any(|t| t.role() == Role::Tool && t.content() == Some("first done")));
}

#[tokio::test]
async fn test_model_timeout_is_fatal() {
    let mut s = session(Arc::new(HangingModel), Arc::new(RecordingTransport::default())).await;
    let err = s.run_turn("hello?").await.unwrap_err();
    assert!(matches!(err, TurnError::ModelTimeout(_)));
    assert_eq!(s.transcript().len(), 1);
}

#[tokio::test]
async fn test_control_characters_survive_into_transcript() {
    let model = ScriptedModel::new(vec![Ok(ModelReply::text("done\u{1}\u{feff} ✅"))]);
    let mut s = session(model, Arc::new(RecordingTransport::default())).await;
    assert_eq!(s.run_turn("a\u{7}b").await.unwrap(), "done\u{1}\u{feff} ✅");
    assert_eq!(s.transcript().snapshot()[1].content(), Some("a\u{7}b"));
}

#[tokio::test]
async fn test_achievement_saved_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::minimal();
    config.tools.tada_list = dir.path().join("tada_list.txt");
    let ctx = ToolContext::new(Arc::new(config), Arc::new(InMemoryStore::new()));
    let transport = Arc::new(LocalTransport::new(
        Arc::new(ToolRegistry::with_builtins().unwrap()),
        ctx,
    ));

    let model = ScriptedModel::new(vec![
        Ok(ModelReply::with_tool_calls(
            None,
            vec![call(
                "call_1",
                "add_tada_list_item",
                r#"{"achievement": "finished my report"}"#,
            )],
        )),
        Ok(ModelReply::text(
            "Great job! I saved 'finished my report' to your Ta-Da list.",
        )),
    ]);
    let mut s = session(model, transport).await;

    let reply = s.run_turn("I finished my report").await.unwrap();
    assert!(reply.contains("finished my report"));

    let turns = s.transcript().snapshot();
    let tool_turn = turns.iter().find(|t| t.role() == Role::Tool).unwrap();
    assert_eq!(
        tool_turn.content(),
        Some("Achievement 'finished my report' saved to Ta-Da list!")
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("tada_list.txt")).unwrap(),
        "- finished my report\n"
    );
}

#[tokio::test]
async fn test_achievement_not_duplicated_after_final_answer_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::minimal();
    config.tools.tada_list = dir.path().join("tada_list.txt");
    let ctx = ToolContext::new(Arc::new(config), Arc::new(InMemoryStore::new()));
    let transport = Arc::new(LocalTransport::new(
        Arc::new(ToolRegistry::with_builtins().unwrap()),
        ctx,
    ));

    let model = ScriptedModel::new(vec![
        Ok(ModelReply::with_tool_calls(
            None,
            vec![call(
                "call_1",
                "add_tada_list_item",
                r#"{"achievement": "finished my report"}"#,
            )],
        )),
        Err(anyhow!("connection reset")),
        Ok(ModelReply::text("It is already on your Ta-Da list.")),
    ]);
    let mut s = session(model.clone(), transport).await;

    assert!(s.run_turn("I finished my report").await.is_err());
    // The retry sees the saved achievement instead of a blank history.
    s.run_turn("Did you save it?").await.unwrap();

    let (retry_turns, _) = model.requests().pop().unwrap();
    assert!(retry_turns.iter().any(|t| t.role() == Role::Tool
        && t.content() == Some("Achievement 'finished my report' saved to Ta-Da list!")));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("tada_list.txt")).unwrap(),
        "- finished my report\n"
    );
}
