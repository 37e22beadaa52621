//! Session integrity checks with optional, explicitly-applied fixes.
//!
//! The doctor turns store listings and scanner problems into [`Finding`]s.
//! Nothing is changed on disk until the caller invokes [`FixAction::apply`].

use crate::config::Config;
use crate::session::repair::sanitize;
use crate::session::scan::{ProblemKind, scan};
use crate::observability::create_observer;
use crate::session::store::{SessionListing, SessionStore, write_atomic};
use crate::session::types::Session;
use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const CHECK: &str = "sessions";

/// How bad a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn icon(self) -> &'static str {
        match self {
            Self::Info => "i",
            Self::Warn => "!",
            Self::Error => "x",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "ERROR",
        })
    }
}

/// A fix the caller may choose to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixAction {
    /// Remove a session file that cannot be salvaged.
    DeleteFile(PathBuf),
    /// Run pairing repair on the stored history and rewrite the file.
    RepairAndSave(PathBuf),
}

impl FixAction {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::DeleteFile(_) => "remove corrupt session file",
            Self::RepairAndSave(_) => "repair tool-call pairing and re-save",
        }
    }

    pub fn apply(&self) -> Result<()> {
        match self {
            Self::DeleteFile(path) => fs::remove_file(path)
                .with_context(|| format!("Failed to remove {}", path.display())),
            Self::RepairAndSave(path) => repair_file(path),
        }
    }
}

/// One problem or observation about a session file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub check: &'static str,
    pub severity: Severity,
    /// Session id (stored key, or filename stem when unavailable).
    pub session_id: String,
    pub message: String,
    pub fix: Option<FixAction>,
}

impl Finding {
    fn new(severity: Severity, session_id: impl Into<String>, message: String) -> Self {
        Self {
            check: CHECK,
            severity,
            session_id: session_id.into(),
            message,
            fix: None,
        }
    }

    fn with_fix(mut self, fix: FixAction) -> Self {
        self.fix = Some(fix);
        self
    }

    pub fn fixable(&self) -> bool {
        self.fix.is_some()
    }
}

/// Check the configured sessions directory, reporting corrupt files through
/// the configured observability backend.
pub fn run(config: &Config) -> Vec<Finding> {
    let store = SessionStore::with_observer(
        config.sessions_dir(),
        create_observer(&config.observability),
    );
    check_store(&store)
}

/// Inspect every session file under `dir`.
pub fn check_sessions(dir: &Path) -> Vec<Finding> {
    check_store(&SessionStore::new(dir))
}

/// Inspect every session file held by `store`.
pub fn check_store(store: &SessionStore) -> Vec<Finding> {
    if !store.dir().exists() {
        return vec![Finding::new(
            Severity::Info,
            "",
            "no sessions directory, nothing to check".to_string(),
        )];
    }

    let listings = match store.list() {
        Ok(listings) => listings,
        Err(e) => {
            return vec![Finding::new(
                Severity::Error,
                "",
                format!("cannot read sessions directory: {e}"),
            )];
        }
    };

    if listings.is_empty() {
        return vec![Finding::new(
            Severity::Info,
            "",
            "no session files found".to_string(),
        )];
    }

    let mut findings = Vec::new();
    for listing in &listings {
        check_file(store, listing, &mut findings);
    }
    findings
}

fn check_file(store: &SessionStore, listing: &SessionListing, findings: &mut Vec<Finding>) {
    let name = &listing.file_name;
    let invalid_json = || {
        Finding::new(
            Severity::Error,
            &listing.id,
            format!("{name}: invalid JSON"),
        )
        .with_fix(FixAction::DeleteFile(listing.path.clone()))
    };

    if listing.corrupt {
        findings.push(invalid_json());
        return;
    }

    // The file may have changed since it was listed.
    let session = match store.read_at(&listing.path) {
        Ok(Some(session)) => session,
        Ok(None) => {
            findings.push(invalid_json());
            return;
        }
        Err(e) => {
            findings.push(Finding::new(
                Severity::Error,
                &listing.id,
                format!("{name}: cannot read: {e}"),
            ));
            return;
        }
    };

    let problems = scan(&session.messages);
    if problems.is_empty() {
        findings.push(Finding::new(
            Severity::Info,
            &listing.id,
            format!("{name}: {} messages, OK", session.messages.len()),
        ));
        return;
    }

    for problem in problems {
        let finding = Finding::new(
            severity_for(problem.kind),
            &listing.id,
            format!("{name}: {problem}"),
        );
        let finding = match problem.kind {
            ProblemKind::OrphanToolCall | ProblemKind::OrphanToolResult => {
                finding.with_fix(FixAction::RepairAndSave(listing.path.clone()))
            }
            ProblemKind::EmptyToolCallId => {
                finding.with_fix(FixAction::DeleteFile(listing.path.clone()))
            }
            ProblemKind::EmptyAssistant | ProblemKind::ConsecutiveUser => finding,
        };
        findings.push(finding);
    }
}

fn severity_for(kind: ProblemKind) -> Severity {
    match kind {
        ProblemKind::EmptyToolCallId
        | ProblemKind::OrphanToolCall
        | ProblemKind::OrphanToolResult => Severity::Error,
        ProblemKind::EmptyAssistant | ProblemKind::ConsecutiveUser => Severity::Warn,
    }
}

/// Rewrite the session file at `path` with its history repaired. The file is
/// written in place so keys that do not match their filename stay put.
fn repair_file(path: &Path) -> Result<()> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut session: Session = serde_json::from_slice(&raw)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let repaired = sanitize(&session.messages);
    session.replace_messages(repaired);

    let data = serde_json::to_string_pretty(&session).context("Failed to serialize session")?;
    write_atomic(path, data.as_bytes())?;
    Ok(())
}
