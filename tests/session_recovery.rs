//! Session persistence and recovery tests.
//!
//! Covers restart behaviour, corrupt file handling, doctor fixes and the
//! pairing invariant under arbitrary histories.

use proptest::prelude::*;
use std::fs;
use turnkeeper::doctor::{self, FixAction, Severity};
use turnkeeper::session::{
    FunctionCall, SYNTHETIC_RESULT_CONTENT, SessionManager, SessionStore, StoreError, scan,
};
use turnkeeper::{Message, Role, ToolCall, sanitize, truncate};

// ─────────────────────────────────────────────────────────────────────────────
// Restart behaviour
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn history_survives_manager_restart() {
    let tmp = tempfile::TempDir::new().unwrap();

    {
        let mgr = SessionManager::new(tmp.path());
        mgr.add_message("telegram:42", Role::User, "what's in /tmp?");
        mgr.add_full_message(
            "telegram:42",
            Message::assistant_with_tool_calls("", vec![ToolCall::new("call_1", "shell")]),
        );
        mgr.add_full_message("telegram:42", Message::tool_result("call_1", "a.txt"));
        mgr.add_message("telegram:42", Role::Assistant, "just a.txt");
        mgr.set_summary("telegram:42", "listing tmp");
        mgr.save("telegram:42").unwrap();
    }

    assert!(tmp.path().join("telegram_42.json").is_file());

    let mgr = SessionManager::new(tmp.path());
    let history = mgr.history("telegram:42");
    assert_eq!(history.len(), 4);
    assert_eq!(history[2].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(mgr.summary("telegram:42").as_deref(), Some("listing tmp"));
}

#[test]
fn crash_mid_turn_is_repaired_before_provider_call() {
    let tmp = tempfile::TempDir::new().unwrap();

    {
        let mgr = SessionManager::new(tmp.path());
        mgr.add_message("cli:main", Role::User, "deploy");
        mgr.add_full_message(
            "cli:main",
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("c1", "exec"), ToolCall::new("c2", "exec")],
            ),
        );
        mgr.add_full_message("cli:main", Message::tool_result("c1", "ok"));
        // Process dies before c2 completes.
        mgr.save("cli:main").unwrap();
    }

    let mgr = SessionManager::new(tmp.path());
    assert_eq!(mgr.history("cli:main").len(), 3);

    let sanitized = mgr.sanitized_history("cli:main");
    assert_eq!(sanitized.len(), 4);
    assert_eq!(sanitized[3].tool_call_id.as_deref(), Some("c2"));
    assert_eq!(sanitized[3].content, SYNTHETIC_RESULT_CONTENT);
}

#[test]
fn budget_enforcement_keeps_groups_whole_across_restart() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mgr = SessionManager::new(tmp.path());

    for i in 0..10 {
        let id = format!("call_{i}");
        mgr.add_message("k", Role::User, format!("step {i}"));
        mgr.add_full_message(
            "k",
            Message::assistant_with_tool_calls("", vec![ToolCall::new(id.clone(), "exec")]),
        );
        mgr.add_full_message("k", Message::tool_result(id, "done"));
    }
    assert_eq!(mgr.history("k").len(), 30);

    let removed = mgr.enforce_budget("k", 20, 8);
    assert!(removed > 0);
    mgr.save("k").unwrap();

    let reloaded = SessionManager::new(tmp.path()).history("k");
    assert_ne!(reloaded[0].role, Role::Tool);
    assert!(scan(&reloaded).is_empty(), "{:?}", scan(&reloaded));
}

// ─────────────────────────────────────────────────────────────────────────────
// Corrupt files and hostile keys
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn corrupt_file_loads_fresh_and_lists_as_corrupt() {
    let tmp = tempfile::TempDir::new().unwrap();
    fs::write(tmp.path().join("slack_C1.json"), "not json at all").unwrap();

    let store = SessionStore::new(tmp.path());
    let session = store.load("slack:C1").unwrap();
    assert!(session.messages.is_empty());

    let listings = store.list().unwrap();
    assert_eq!(listings.len(), 1);
    assert!(listings[0].corrupt);
    assert_eq!(listings[0].id, "slack_C1");
}

#[test]
fn traversal_keys_never_touch_the_filesystem() {
    let tmp = tempfile::TempDir::new().unwrap();
    let sessions = tmp.path().join("sessions");
    let mgr = SessionManager::new(&sessions);

    for key in ["", ".", "..", "../escape", "a/b", "a\\b"] {
        mgr.add_message(key, Role::User, "hi");
        let err = mgr.save(key).unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }), "{key:?}");
    }

    assert!(!sessions.exists());
    assert!(!tmp.path().join("escape.json").exists());
}

#[test]
fn delete_and_clear_remove_files() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mgr = SessionManager::new(tmp.path());
    for key in ["a:1", "b:2", "c:3"] {
        mgr.add_message(key, Role::User, "hi");
        mgr.save(key).unwrap();
    }

    let removed = mgr.delete("a:1").unwrap();
    assert_eq!(removed, tmp.path().join("a_1.json"));
    assert!(mgr.history("a:1").is_empty());
    assert!(matches!(
        mgr.delete("a:1"),
        Err(StoreError::NotFound { .. })
    ));

    assert_eq!(mgr.clear().unwrap(), 2);
    assert!(mgr.store().list().unwrap().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Doctor
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn doctor_fixes_are_applied_only_on_request() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = SessionStore::new(tmp.path());

    let mut broken = store.load("discord:9").unwrap();
    broken.push(Message::user("hi"));
    broken.push(Message::tool_result("ghost", "stale"));
    store.save(&broken).unwrap();
    fs::write(tmp.path().join("junk.json"), "{").unwrap();

    let findings = doctor::check_sessions(tmp.path());
    let errors: Vec<_> = findings
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|f| f.fixable()));

    // Still broken on disk.
    assert_eq!(doctor::check_sessions(tmp.path()), findings);

    for finding in &findings {
        if let Some(fix) = &finding.fix {
            fix.apply().unwrap();
        }
    }

    let after = doctor::check_sessions(tmp.path());
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].severity, Severity::Info);
    assert_eq!(after[0].session_id, "discord:9");
    assert!(!tmp.path().join("junk.json").exists());
    assert!(matches!(
        findings.iter().find(|f| f.session_id == "junk").and_then(|f| f.fix.clone()),
        Some(FixAction::DeleteFile(_))
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Pairing invariant under arbitrary histories
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Step {
    User,
    Assistant,
    Calls(usize),
    /// Calls named only through the nested `function` object.
    FunctionCalls(usize),
    /// An empty-id call alongside a normal one.
    EmptyIdCall,
    Result(usize),
    Stray,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        2 => Just(Step::User),
        2 => Just(Step::Assistant),
        2 => (1usize..4).prop_map(Step::Calls),
        1 => (1usize..3).prop_map(Step::FunctionCalls),
        1 => Just(Step::EmptyIdCall),
        3 => any::<usize>().prop_map(Step::Result),
        1 => Just(Step::Stray),
    ]
}

/// Build a history from `steps`. Call ids are unique; results pick any
/// previously issued id, so duplicates and out-of-place results occur.
fn build(steps: &[Step]) -> Vec<Message> {
    let mut issued: Vec<String> = Vec::new();
    let mut messages = Vec::new();

    for (i, step) in steps.iter().enumerate() {
        match step {
            Step::User => messages.push(Message::user(format!("u{i}"))),
            Step::Assistant => messages.push(Message::assistant(format!("a{i}"))),
            Step::Calls(n) => {
                let calls: Vec<ToolCall> = (0..*n)
                    .map(|j| ToolCall::new(format!("call_{i}_{j}"), "exec"))
                    .collect();
                issued.extend(calls.iter().map(|c| c.id.clone()));
                messages.push(Message::assistant_with_tool_calls("", calls));
            }
            Step::FunctionCalls(n) => {
                let calls: Vec<ToolCall> = (0..*n)
                    .map(|j| ToolCall {
                        id: format!("fn_{i}_{j}"),
                        name: String::new(),
                        function: Some(FunctionCall {
                            name: "web_search".into(),
                            arguments: "{}".into(),
                        }),
                    })
                    .collect();
                issued.extend(calls.iter().map(|c| c.id.clone()));
                messages.push(Message::assistant_with_tool_calls("", calls));
            }
            Step::EmptyIdCall => {
                let id = format!("call_{i}_0");
                issued.push(id.clone());
                messages.push(Message::assistant_with_tool_calls(
                    "",
                    vec![ToolCall::new("", "exec"), ToolCall::new(id, "exec")],
                ));
            }
            Step::Result(pick) => {
                let id = if issued.is_empty() {
                    format!("ghost_{i}")
                } else {
                    issued[pick % issued.len()].clone()
                };
                messages.push(Message::tool_result(id, "out"));
            }
            Step::Stray => messages.push(Message::tool_result(format!("stray_{i}"), "?")),
        }
    }
    messages
}

fn assert_paired(messages: &[Message]) {
    for (i, msg) in messages.iter().enumerate() {
        for call in msg.calls().iter().filter(|c| !c.id.is_empty()) {
            let later = messages[i + 1..]
                .iter()
                .filter(|m| m.answers() == Some(call.id.as_str()))
                .count();
            assert_eq!(later, 1, "call {} answered {later} times", call.id);
        }
        if let Some(id) = msg.answers() {
            let earlier = messages[..i]
                .iter()
                .any(|m| m.calls().iter().any(|c| c.id == id));
            assert!(earlier, "result {id} at {i} has no earlier call");
        }
    }
}

proptest! {
    #[test]
    fn property_sanitize_restores_pairing(steps in prop::collection::vec(step(), 0..40)) {
        let repaired = sanitize(&build(&steps));
        assert_paired(&repaired);
    }

    #[test]
    fn property_sanitize_is_idempotent(steps in prop::collection::vec(step(), 0..40)) {
        let once = sanitize(&build(&steps));
        let twice = sanitize(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn property_sanitize_keeps_non_tool_messages_intact(
        steps in prop::collection::vec(step(), 0..40),
    ) {
        // Empty-id calls included: repair only adds or removes tool results.
        let history = build(&steps);
        let repaired = sanitize(&history);
        let before: Vec<&Message> = history.iter().filter(|m| m.role != Role::Tool).collect();
        let after: Vec<&Message> = repaired.iter().filter(|m| m.role != Role::Tool).collect();
        prop_assert_eq!(before, after);
    }

    #[test]
    fn property_truncate_keeps_groups_whole_on_raw_history(
        steps in prop::collection::vec(step(), 1..40),
        pick in any::<usize>(),
    ) {
        let history = build(&steps);
        let target = pick % history.len();
        let kept = truncate(&history, target);
        if let Some(first) = kept.first() {
            prop_assert_ne!(first.role, Role::Tool);
        }
        assert_paired(&kept);
    }

    #[test]
    fn property_truncate_never_starts_with_tool_result(
        steps in prop::collection::vec(step(), 1..40),
        target in 1usize..20,
    ) {
        let history = sanitize(&build(&steps));
        let kept = truncate(&history, target);
        if let Some(first) = kept.first() {
            prop_assert_ne!(first.role, Role::Tool);
        }
        assert_paired(&kept);
    }

    #[test]
    fn property_truncate_within_target_is_identity(
        steps in prop::collection::vec(step(), 0..20),
        extra in 0usize..5,
    ) {
        let history = build(&steps);
        let kept = truncate(&history, history.len() + extra);
        prop_assert_eq!(kept, history);
    }
}
