//! Conversation history storage and repair.
//!
//! Sessions are stored as one pretty-printed JSON file per conversation key.
//! Pairing repair runs before every provider call; truncation runs when a
//! history outgrows its budget; the scanner is read-only and feeds the doctor.

pub mod manager;
pub mod repair;
pub mod scan;
pub mod store;
pub mod truncate;
pub mod types;

pub use manager::{HistoryBudget, SessionManager};
pub use repair::{
    RepairReport, SYNTHETIC_RESULT_CONTENT, repair_tool_pairs, sanitize, sanitize_with,
};
pub use scan::{Problem, ProblemKind, scan};
pub use store::{SessionListing, SessionStore, StoreError, sanitize_filename, validate_key};
pub use truncate::{truncate, truncate_with};
pub use types::*;
