//! Tool-call / tool-result pairing repair.
//!
//! Providers reject histories where a tool call has no result, or a result
//! answers a call that is not in the conversation. Crashes mid-turn,
//! truncation and hand-edited files all produce those shapes, so this pass runs
//! on the in-memory message list immediately before every provider call.
//!
//! After repair, every tool call with a non-empty id has exactly one later
//! `tool` message answering it, and every `tool` message with a non-empty id
//! answers some earlier tool call. Calls with an empty id are left alone; the
//! scanner reports them.
//!
//! Call ids are assumed unique within a session. A history that reuses an id
//! across assistant turns is malformed: the id counts as answered once any
//! result for it survives, so the later call receives no result of its own.

use std::collections::HashSet;

use super::types::{Message, Role, ToolCall};
use crate::observability::{LogObserver, Observer, ObserverEvent};

/// Content of the placeholder result injected for unanswered tool calls.
pub const SYNTHETIC_RESULT_CONTENT: &str =
    "[tool result unavailable: session history was compressed]";

/// Summary of what [`repair_tool_pairs`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Tool-result ids with no earlier matching call, dropped.
    pub dropped_orphans: Vec<String>,
    /// Tool-result ids answered more than once; later copies dropped.
    pub dropped_duplicates: Vec<String>,
    /// Tool-call ids that received a synthetic placeholder result.
    pub injected: Vec<String>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.dropped_orphans.is_empty()
            && self.dropped_duplicates.is_empty()
            && self.injected.is_empty()
    }
}

/// Repair pairing and log each decision through `tracing`.
pub fn sanitize(messages: &[Message]) -> Vec<Message> {
    sanitize_with(messages, &LogObserver)
}

/// Repair pairing, reporting each decision to `observer`.
pub fn sanitize_with(messages: &[Message], observer: &dyn Observer) -> Vec<Message> {
    repair_tool_pairs(messages, observer).0
}

/// Restore the call/result pairing invariant.
///
/// 1. **Orphaned results**: a `tool` message whose id does not match a call in
///    an earlier assistant message is dropped.
/// 2. **Duplicate results**: only the first result for a given id is kept.
/// 3. **Missing results**: the calls of the most recent assistant message are
///    tracked as pending; when the run of `tool` messages after it ends (or the
///    input ends), a placeholder result is inserted for each pending call that
///    has no result anywhere in the surviving history.
///
/// Matching is by id only, never by position. Never fails.
pub fn repair_tool_pairs(
    messages: &[Message],
    observer: &dyn Observer,
) -> (Vec<Message>, RepairReport) {
    let mut report = RepairReport::default();
    if messages.is_empty() {
        return (Vec::new(), report);
    }

    // Pass 1: drop results that answer nothing seen so far, and repeats.
    let mut seen_calls: HashSet<&str> = HashSet::new();
    let mut answered: HashSet<String> = HashSet::new();
    let mut filtered: Vec<&Message> = Vec::with_capacity(messages.len());

    for (index, msg) in messages.iter().enumerate() {
        for call in msg.calls() {
            if !call.id.is_empty() {
                seen_calls.insert(call.id.as_str());
            }
        }

        if let Some(id) = msg.answers() {
            if !seen_calls.contains(id) {
                observer.record_event(&ObserverEvent::OrphanResultDropped {
                    tool_call_id: id.to_string(),
                    index,
                });
                report.dropped_orphans.push(id.to_string());
                continue;
            }
            if !answered.insert(id.to_string()) {
                observer.record_event(&ObserverEvent::DuplicateResultDropped {
                    tool_call_id: id.to_string(),
                    index,
                });
                report.dropped_duplicates.push(id.to_string());
                continue;
            }
        }

        filtered.push(msg);
    }

    // Pass 2: flush placeholders for pending calls once their result run ends.
    let mut repaired: Vec<Message> = Vec::with_capacity(filtered.len());
    let mut pending: &[ToolCall] = &[];

    for msg in filtered {
        if msg.role != Role::Tool {
            flush_pending(pending, &mut answered, &mut repaired, &mut report, observer);
            pending = &[];
        }

        repaired.push(msg.clone());

        if msg.has_tool_calls() {
            pending = msg.calls();
        }
    }
    flush_pending(pending, &mut answered, &mut repaired, &mut report, observer);

    (repaired, report)
}

fn flush_pending(
    pending: &[ToolCall],
    answered: &mut HashSet<String>,
    repaired: &mut Vec<Message>,
    report: &mut RepairReport,
    observer: &dyn Observer,
) {
    for call in pending {
        if call.id.is_empty() || answered.contains(&call.id) {
            continue;
        }
        observer.record_event(&ObserverEvent::SyntheticResultInjected {
            tool_call_id: call.id.clone(),
            tool_name: call.tool_name().to_string(),
        });
        repaired.push(Message::tool_result(call.id.clone(), SYNTHETIC_RESULT_CONTENT));
        answered.insert(call.id.clone());
        report.injected.push(call.id.clone());
    }
}

// ── Tests ────────────────────────────────────────────────────────
