#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::items_after_statements,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::needless_pass_by_value,
    clippy::redundant_closure_for_method_calls,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::cast_precision_loss
)]

//! Persistent conversation sessions for tool-using chat agents.
//!
//! Histories are stored one JSON file per session key. Every history handed
//! to a model goes through pairing repair first, so each tool call is answered
//! by exactly one later tool result.

pub mod config;
pub mod doctor;
pub mod observability;
pub mod session;
pub mod util;

pub use config::Config;
pub use session::{
    Message, Role, Session, SessionManager, SessionStore, StoreError, ToolCall, sanitize, truncate,
};
