/// Discrete events emitted by the history engine.
///
/// Repair and truncation are pure transformations; the only side effect they
/// have is reporting each decision here. Events carry ids and counts, never
/// message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    /// A tool result was dropped because no earlier tool call carries its id.
    OrphanResultDropped { tool_call_id: String, index: usize },
    /// A second result for an already-answered tool call was dropped.
    DuplicateResultDropped { tool_call_id: String, index: usize },
    /// A placeholder result was inserted for a tool call that had none.
    SyntheticResultInjected {
        tool_call_id: String,
        tool_name: String,
    },
    /// History was cut down to a shorter suffix.
    HistoryTruncated { before: usize, after: usize },
    /// A session file was written.
    SessionSaved { key: String, messages: usize },
    /// A session file was removed.
    SessionDeleted { key: String },
    /// A session file failed to parse and was surfaced as corrupt.
    CorruptSessionSeen { file: String },
}

/// Sink for history-engine events.
///
/// The engine takes `&dyn Observer` so it can run without any logging
/// subsystem attached; implementations must be `Send + Sync` because the
/// session manager shares its observer via `Arc`.
pub trait Observer: Send + Sync + 'static {
    /// Record a discrete event. Called synchronously on the hot path.
    fn record_event(&self, event: &ObserverEvent);

    /// Flush buffered data. Default is a no-op.
    fn flush(&self) {}

    /// Backend name used in logs and diagnostics (e.g. `"log"`, `"noop"`).
    fn name(&self) -> &str;
}
