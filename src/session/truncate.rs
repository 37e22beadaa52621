//! Size-based history truncation that never splits a tool-call group.
//!
//! A group is an assistant message carrying tool calls plus the `tool`
//! messages that follow it. Cutting through a group would leave results
//! without their call, so the cut point snaps back to the group's start and
//! the retained suffix is then run through pairing repair.

use super::repair::sanitize_with;
use super::types::{Message, Role};
use crate::observability::{LogObserver, Observer, ObserverEvent};

/// Keep roughly the last `target` messages, logging through `tracing`.
pub fn truncate(messages: &[Message], target: usize) -> Vec<Message> {
    truncate_with(messages, target, &LogObserver)
}

/// Keep roughly the last `target` messages.
///
/// Returns the input unchanged when it already fits. Otherwise the result may
/// be longer than `target` (a group straddling the cut is kept whole) or
/// slightly different in shape (repair drops results whose call was cut and
/// fills in results lost with the dropped prefix).
pub fn truncate_with(messages: &[Message], target: usize, observer: &dyn Observer) -> Vec<Message> {
    if messages.len() <= target {
        return messages.to_vec();
    }
    if target == 0 {
        observer.record_event(&ObserverEvent::HistoryTruncated {
            before: messages.len(),
            after: 0,
        });
        return Vec::new();
    }

    let start = snap_to_group_start(messages, messages.len() - target);
    let retained = sanitize_with(&messages[start..], observer);

    observer.record_event(&ObserverEvent::HistoryTruncated {
        before: messages.len(),
        after: retained.len(),
    });
    retained
}

/// Move `cut` backward while it points into a run of tool results, so the
/// owning assistant message is retained with them.
fn snap_to_group_start(messages: &[Message], mut cut: usize) -> usize {
    while cut > 0 && messages[cut].role == Role::Tool {
        cut -= 1;
    }
    cut
}
