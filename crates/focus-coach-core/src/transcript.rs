//! Append-only conversation transcript.
//!
//! The transcript enforces the tool-call pairing rule: a tool turn must
//! answer a still-unanswered call from the nearest preceding assistant turn,
//! and no other turn may be appended while such calls are unanswered.
//!
//! A user turn is driven through a [`StagedTurns`] guard: turns are appended
//! to the stage, the model sees the committed transcript plus the stage,
//! and the stage only lands in the transcript on [`StagedTurns::commit`].
//! Dropping the guard discards the stage. The caller decides where to commit:
//! a stage may be committed once its tool calls are all answered, and the
//! final answer appended to the transcript afterwards.

use std::collections::HashSet;

use thiserror::Error;

use crate::models::{Role, Turn};

/// Reasons a turn can be rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("tool result '{id}' does not answer a pending tool call")]
    UnmatchedToolResult { id: String },
    #[error("tool result is missing its tool_call_id")]
    MissingToolCallId,
    #[error("{pending} tool call(s) from the previous assistant turn are unanswered")]
    UnresolvedToolCalls { pending: usize },
}

/// Ordered, append-only list of turns.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transcript that opens with a system prompt.
    pub fn with_system(prompt: &str) -> Self {
        Self {
            turns: vec![Turn::system(prompt)],
        }
    }

    /// Append one turn.
    ///
    /// Never fails for turns that respect the tool-call pairing rule.
    pub fn append(&mut self, turn: Turn) -> Result<(), TranscriptError> {
        check_next(&self.turns, &[], &turn)?;
        self.turns.push(turn);
        Ok(())
    }

    /// The full ordered transcript.
    pub fn snapshot(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Start staging the turns of one user exchange.
    pub fn stage(&mut self) -> StagedTurns<'_> {
        StagedTurns {
            base: self,
            staged: Vec::new(),
        }
    }
}

/// Turns of an in-progress exchange, not yet part of the transcript.
#[derive(Debug)]
pub struct StagedTurns<'a> {
    base: &'a mut Transcript,
    staged: Vec<Turn>,
}

impl StagedTurns<'_> {
    pub fn append(&mut self, turn: Turn) -> Result<(), TranscriptError> {
        check_next(&self.base.turns, &self.staged, &turn)?;
        self.staged.push(turn);
        Ok(())
    }

    /// Committed turns followed by the staged ones.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.base
            .turns
            .iter()
            .chain(self.staged.iter())
            .cloned()
            .collect()
    }

    pub fn staged(&self) -> &[Turn] {
        &self.staged
    }

    /// Move the staged turns into the transcript. Returns how many landed.
    pub fn commit(self) -> usize {
        let n = self.staged.len();
        self.base.turns.extend(self.staged);
        n
    }
}

/// Tool call ids of the nearest assistant turn that are still unanswered.
fn pending_tool_calls<'t>(committed: &'t [Turn], staged: &'t [Turn]) -> HashSet<&'t str> {
    let mut answered: HashSet<&str> = HashSet::new();
    for turn in committed.iter().chain(staged.iter()).rev() {
        match turn.role() {
            Role::Tool => {
                if let Some(id) = turn.tool_call_id() {
                    answered.insert(id);
                }
            }
            Role::Assistant if turn.has_tool_calls() => {
                let issued: HashSet<&str> = turn
                    .tool_calls()
                    .iter()
                    .map(|c| c.id())
                    .filter(|id| !answered.contains(id))
                    .collect();
                return issued;
            }
            _ => break,
        }
    }
    HashSet::new()
}

fn check_next(committed: &[Turn], staged: &[Turn], turn: &Turn) -> Result<(), TranscriptError> {
    let pending = pending_tool_calls(committed, staged);
    if turn.role() == Role::Tool {
        let id = turn
            .tool_call_id()
            .ok_or(TranscriptError::MissingToolCallId)?;
        if !pending.contains(id) {
            return Err(TranscriptError::UnmatchedToolResult { id: id.to_string() });
        }
        return Ok(());
    }
    if !pending.is_empty() {
        return Err(TranscriptError::UnresolvedToolCalls {
            pending: pending.len(),
        });
    }
    Ok(())
}
