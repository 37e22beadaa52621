//! One-JSON-file-per-session persistence.
//!
//! A session keyed `telegram:123` lives at `<dir>/telegram_123.json`. The
//! filename mapping is one-way: lookups re-derive it, or match on the `key`
//! stored inside each file, and never try to reverse it. Two keys that differ
//! only in `:` versus `_` map to the same file; this is not detected.
//!
//! Every save overwrites the whole file through a temp file and rename. There
//! is no cross-process locking; callers serialize access per key.

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::types::Session;
use crate::observability::{LogObserver, Observer, ObserverEvent};

const SESSION_EXTENSION: &str = "json";

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "invalid session key {key:?}: must be non-empty, not \".\" or \"..\", and free of path separators"
    )]
    InvalidKey { key: String },

    #[error("session not found: {id}")]
    NotFound { id: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize session {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Reject keys that could escape the sessions directory.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']) {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Filename stem for `key`: every `:` becomes `_`.
pub fn sanitize_filename(key: &str) -> String {
    key.replace(':', "_")
}

// ── Listing ──────────────────────────────────────────────────────

/// Display metadata for one stored session file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionListing {
    /// Key stored in the file, or the filename stem when unavailable.
    pub id: String,
    pub file_name: String,
    pub path: PathBuf,
    /// Message count; zero for corrupt files.
    pub messages: usize,
    pub modified: Option<DateTime<Utc>>,
    pub size: u64,
    pub corrupt: bool,
}

// ── SessionStore ─────────────────────────────────────────────────

/// Session files under a single directory.
pub struct SessionStore {
    dir: PathBuf,
    observer: Arc<dyn Observer>,
}

impl SessionStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_observer(dir, Arc::new(LogObserver::new()))
    }

    pub fn with_observer(dir: impl Into<PathBuf>, observer: Arc<dyn Observer>) -> Self {
        Self {
            dir: dir.into(),
            observer,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn observer(&self) -> &Arc<dyn Observer> {
        &self.observer
    }

    /// Path a session with `key` is written to.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{SESSION_EXTENSION}", sanitize_filename(key)))
    }

    /// Load the session for `key`, or a fresh empty one.
    ///
    /// Missing files, invalid keys and unparsable JSON all yield a fresh
    /// session; corrupt files are surfaced through [`list`](Self::list) and
    /// the doctor instead. Other I/O failures are returned.
    pub fn load(&self, key: &str) -> Result<Session, StoreError> {
        if validate_key(key).is_err() {
            tracing::debug!(key = %key, "not reading session file for invalid key");
            return Ok(Session::new(key));
        }

        let path = self.path_for(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Session::new(key)),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        match serde_json::from_slice::<Session>(&data) {
            Ok(mut session) => {
                if session.key.is_empty() {
                    session.key = key.to_string();
                }
                Ok(session)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt session file, starting fresh");
                self.observer.record_event(&ObserverEvent::CorruptSessionSeen {
                    file: file_name_of(&path),
                });
                Ok(Session::new(key))
            }
        }
    }

    /// Persist `session`, replacing any previous file for its key.
    ///
    /// The key is validated before any filesystem access.
    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        validate_key(&session.key)?;

        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let data =
            serde_json::to_string_pretty(session).map_err(|source| StoreError::Serialize {
                key: session.key.clone(),
                source,
            })?;
        let path = self.path_for(&session.key);
        write_atomic(&path, data.as_bytes())?;

        self.observer.record_event(&ObserverEvent::SessionSaved {
            key: session.key.clone(),
            messages: session.messages.len(),
        });
        Ok(())
    }

    /// Parse the session file at `path` for display. `Ok(None)` when the file
    /// is not valid session JSON (including non-UTF-8 content).
    pub fn read_at(&self, path: &Path) -> Result<Option<Session>, StoreError> {
        let data = fs::read(path).map_err(|e| StoreError::io(path, e))?;
        Ok(serde_json::from_slice(&data).ok())
    }

    /// Enumerate stored sessions, most recently modified first.
    ///
    /// Files that fail to parse are listed with `corrupt = true` and an id
    /// derived from the filename. A missing directory lists as empty.
    pub fn list(&self) -> Result<Vec<SessionListing>, StoreError> {
        let mut listings = Vec::new();

        for path in self.session_files()? {
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable session file");
                    continue;
                }
            };
            let data = match fs::read(&path) {
                Ok(data) => data,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable session file");
                    continue;
                }
            };

            let file_name = file_name_of(&path);
            let stem = file_stem_of(&path);
            let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

            let listing = match serde_json::from_slice::<Session>(&data) {
                Ok(session) => SessionListing {
                    id: if session.key.is_empty() {
                        stem
                    } else {
                        session.key
                    },
                    file_name,
                    path,
                    messages: session.messages.len(),
                    modified,
                    size: metadata.len(),
                    corrupt: false,
                },
                Err(_) => {
                    self.observer.record_event(&ObserverEvent::CorruptSessionSeen {
                        file: file_name.clone(),
                    });
                    SessionListing {
                        id: stem,
                        file_name,
                        path,
                        messages: 0,
                        modified,
                        size: metadata.len(),
                        corrupt: true,
                    }
                }
            };
            listings.push(listing);
        }

        listings.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.id.cmp(&b.id)));
        Ok(listings)
    }

    /// Resolve a logical id to a session file.
    ///
    /// Stored keys are matched first (corrupt files match on their filename
    /// stem). Failing that, `<id>.json` and `<sanitized id>.json` are tried.
    pub fn find_by_id(&self, id: &str) -> Option<PathBuf> {
        let files = self.session_files().ok()?;

        for path in &files {
            let Ok(data) = fs::read(path) else {
                continue;
            };
            match serde_json::from_slice::<Session>(&data) {
                Ok(session) if session.key == id => return Some(path.clone()),
                Ok(_) => {}
                Err(_) if file_stem_of(path) == id => return Some(path.clone()),
                Err(_) => {}
            }
        }

        if validate_key(id).is_err() {
            return None;
        }
        [
            self.dir.join(format!("{id}.{SESSION_EXTENSION}")),
            self.path_for(id),
        ]
        .into_iter()
        .find(|candidate| candidate.is_file())
    }

    /// Delete the session file for `id`. Returns the removed path.
    pub fn delete(&self, id: &str) -> Result<PathBuf, StoreError> {
        let path = self.find_by_id(id).ok_or_else(|| StoreError::NotFound {
            id: id.to_string(),
        })?;
        fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
        self.observer
            .record_event(&ObserverEvent::SessionDeleted { key: id.to_string() });
        Ok(path)
    }

    /// Delete every stored session file. Returns how many were removed;
    /// individual failures are logged and skipped.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let mut deleted = 0;
        for listing in self.list()? {
            match fs::remove_file(&listing.path) {
                Ok(()) => {
                    self.observer
                        .record_event(&ObserverEvent::SessionDeleted { key: listing.id });
                    deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %listing.path.display(), error = %e, "failed to delete session file");
                }
            }
        }
        Ok(deleted)
    }

    // ── Internal helpers ─────────────────────────────────────────

    /// `*.json` regular files in the sessions directory, sorted by name.
    fn session_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(SESSION_EXTENSION)
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

/// Write to a sibling temp file, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let tmp_path = path.with_extension(format!("{SESSION_EXTENSION}.tmp-{}", uuid::Uuid::new_v4()));
    fs::write(&tmp_path, data).map_err(|e| StoreError::io(&tmp_path, e))?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ── Tests ────────────────────────────────────────────────────────
