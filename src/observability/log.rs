use super::traits::{Observer, ObserverEvent};
use tracing::{debug, info, warn};

/// Observer that forwards events to `tracing`.
pub struct LogObserver;

impl LogObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Observer for LogObserver {
    fn record_event(&self, event: &ObserverEvent) {
        match event {
            ObserverEvent::OrphanResultDropped {
                tool_call_id,
                index,
            } => {
                debug!(tool_call_id = %tool_call_id, index = index, "repair.drop_orphan_result");
            }
            ObserverEvent::DuplicateResultDropped {
                tool_call_id,
                index,
            } => {
                debug!(tool_call_id = %tool_call_id, index = index, "repair.drop_duplicate_result");
            }
            ObserverEvent::SyntheticResultInjected {
                tool_call_id,
                tool_name,
            } => {
                debug!(
                    tool_call_id = %tool_call_id,
                    tool_name = %tool_name,
                    "repair.inject_synthetic_result"
                );
            }
            ObserverEvent::HistoryTruncated { before, after } => {
                info!(before = before, after = after, "history.truncated");
            }
            ObserverEvent::SessionSaved { key, messages } => {
                debug!(key = %key, messages = messages, "session.saved");
            }
            ObserverEvent::SessionDeleted { key } => {
                info!(key = %key, "session.deleted");
            }
            ObserverEvent::CorruptSessionSeen { file } => {
                warn!(file = %file, "session.corrupt");
            }
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}
