// src/app/events.rs

//! Change events delivered to apps.
//!
//! The wire form is a small JSON object, independent of any hosting
//! provider:
//!
//! ```json
//! { "action": "opened", "number": 42,
//!   "base_repo": "https://github.com/acme/web.git",
//!   "merge_repo": "https://github.com/alice/web.git#fix" }
//! ```

use serde::Deserialize;
use thiserror::Error;

use crate::types::ChangeNumber;

/// What happened to a change.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ChangeAction {
    Opened,
    Synchronize,
    Closed,
    Reopened,
    /// Any action this crate does not act on; kept for logging.
    Other(String),
}

impl From<String> for ChangeAction {
    fn from(action: String) -> Self {
        match action.as_str() {
            "opened" => ChangeAction::Opened,
            "synchronize" => ChangeAction::Synchronize,
            "closed" => ChangeAction::Closed,
            "reopened" => ChangeAction::Reopened,
            _ => ChangeAction::Other(action),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    pub number: ChangeNumber,
    pub base_repo: String,
    #[serde(default)]
    pub merge_repo: Option<String>,
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("malformed change event: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn parse_change_event(payload: &[u8]) -> Result<ChangeEvent, EventError> {
    Ok(serde_json::from_slice(payload)?)
}
