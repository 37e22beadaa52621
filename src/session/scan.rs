//! Read-only structural diagnostics for a stored message history.
//!
//! The scanner reports every problem it finds and never mutates its input.
//! Repair is a separate, explicit step (see [`super::repair`]).

use std::fmt;

use super::types::{Message, Role};

/// Category of a structural problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProblemKind {
    /// A tool call with an empty id; it can never be answered.
    EmptyToolCallId,
    /// A tool call with no later result.
    OrphanToolCall,
    /// A tool result with no earlier call.
    OrphanToolResult,
    /// Assistant turn with no content and no tool calls.
    EmptyAssistant,
    /// Two user turns in a row; some providers reject this.
    ConsecutiveUser,
}

impl ProblemKind {
    /// Whether pairing repair resolves this kind of problem.
    pub fn repairable(self) -> bool {
        matches!(self, Self::OrphanToolCall | Self::OrphanToolResult)
    }
}

/// A single problem found at `index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub index: usize,
    pub kind: ProblemKind,
    pub description: String,
}

impl Problem {
    fn new(index: usize, kind: ProblemKind, detail: String) -> Self {
        Self {
            index,
            kind,
            description: format!("message[{index}]: {detail}"),
        }
    }

    pub fn fixable(&self) -> bool {
        self.kind.repairable()
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Inspect `messages` for corruption patterns. Checks are independent, so a
/// single message may yield several problems.
pub fn scan(messages: &[Message]) -> Vec<Problem> {
    let mut problems = Vec::new();

    for (i, msg) in messages.iter().enumerate() {
        for call in msg.calls() {
            let name = call.tool_name();
            if call.id.is_empty() {
                problems.push(Problem::new(
                    i,
                    ProblemKind::EmptyToolCallId,
                    format!("tool_call has empty ID (tool: {name})"),
                ));
                continue;
            }
            let answered = messages[i + 1..]
                .iter()
                .any(|later| later.answers() == Some(call.id.as_str()));
            if !answered {
                problems.push(Problem::new(
                    i,
                    ProblemKind::OrphanToolCall,
                    format!(
                        "orphan tool_call {:?} (tool: {name}): no matching tool result",
                        call.id
                    ),
                ));
            }
        }

        if let Some(id) = msg.answers() {
            let called = messages[..i]
                .iter()
                .any(|prev| prev.calls().iter().any(|call| call.id == id));
            if !called {
                problems.push(Problem::new(
                    i,
                    ProblemKind::OrphanToolResult,
                    format!("orphan tool_result {id:?}: no matching tool_call"),
                ));
            }
        }

        if msg.role == Role::Assistant && msg.content.is_empty() && msg.tool_calls.is_empty() {
            problems.push(Problem::new(
                i,
                ProblemKind::EmptyAssistant,
                "assistant message with empty content and no tool_calls".to_string(),
            ));
        }

        if i > 0 && msg.role == Role::User && messages[i - 1].role == Role::User {
            problems.push(Problem::new(
                i,
                ProblemKind::ConsecutiveUser,
                "consecutive user messages (some providers reject this)".to_string(),
            ));
        }
    }

    problems
}
