//! Core data models shared by the orchestration loop and the ingestion
//! pipeline.
//!
//! [`Turn`] and [`ToolCall`] values are sanitized on construction, so any
//! value of these types is safe to store in a transcript and to serialize
//! into a model request.

use serde::{Deserialize, Serialize};

use crate::sanitize::sanitize;

/// Speaker of a [`Turn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model.
///
/// `arguments` is kept as raw text: the orchestration loop decides how to
/// decode it, and a malformed value must still round-trip into the
/// transcript unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCall {
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: sanitize(id),
            name: sanitize(name),
            arguments: sanitize(arguments),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &str {
        &self.arguments
    }
}

/// One entry in the conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    role: Role,
    content: Option<String>,
    tool_calls: Vec<ToolCall>,
    tool_call_id: Option<String>,
}

impl Turn {
    pub fn system(content: &str) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: &str) -> Self {
        Self::plain(Role::User, content)
    }

    /// A final assistant answer.
    pub fn assistant(content: &str) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// An assistant turn requesting tool execution.
    ///
    /// Blank accompanying text is stored as absent content.
    pub fn assistant_tool_calls(content: Option<&str>, tool_calls: Vec<ToolCall>) -> Self {
        let content = content.map(sanitize).filter(|c| !c.trim().is_empty());
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// A tool result answering the tool call with id `tool_call_id`.
    pub fn tool(tool_call_id: &str, content: &str) -> Self {
        Self {
            role: Role::Tool,
            content: Some(sanitize(content)),
            tool_calls: Vec::new(),
            tool_call_id: Some(sanitize(tool_call_id)),
        }
    }

    fn plain(role: Role, content: &str) -> Self {
        Self {
            role,
            content: Some(sanitize(content)),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One indexable unit of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// `<source>_chunk_<index>`.
    pub id: String,
    /// Basename of the originating file.
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk returned by a similarity query, best match first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedChunk {
    pub chunk_id: String,
    pub source: String,
    pub text: String,
    /// Higher is more similar. Only comparable within one query.
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_constructors_keep_text() {
        let t = Turn::user("¿Cómo empiezo?\u{7} ✅");
        assert_eq!(t.role(), Role::User);
        assert_eq!(t.content(), Some("¿Cómo empiezo?\u{7} ✅"));
        assert!(t.tool_call_id().is_none());
    }

    #[test]
    fn test_tool_call_fields_kept_verbatim() {
        let call = ToolCall::new("call\u{feff}_1", "add_tada_list_item", "{\"a\":1}\u{0}");
        assert_eq!(call.id(), "call\u{feff}_1");
        assert_eq!(call.name(), "add_tada_list_item");
        assert_eq!(call.arguments(), "{\"a\":1}\u{0}");
    }

    #[test]
    fn test_assistant_tool_calls_blank_content_is_absent() {
        let call = ToolCall::new("c1", "search_focus_strategy", "{}");
        let t = Turn::assistant_tool_calls(Some("   "), vec![call]);
        assert!(t.content().is_none());
        assert!(t.has_tool_calls());

        let t = Turn::assistant_tool_calls(None, vec![]);
        assert!(t.content().is_none());
    }

    #[test]
    fn test_tool_turn_back_reference() {
        let t = Turn::tool("c1", "done");
        assert_eq!(t.role(), Role::Tool);
        assert_eq!(t.tool_call_id(), Some("c1"));
        assert_eq!(t.content(), Some("done"));
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(Role::Tool.as_str(), "tool");
    }
}
