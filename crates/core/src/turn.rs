//! Chat turn domain types.
//!
//! A `ChatTurn` pairs one user input with the system's response. Turns are
//! immutable once recorded: they are created at turn completion, appended
//! to the conversation log, and destroyed only on explicit session reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an agent session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One completed user/response exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    /// What the user typed
    pub user_input: String,

    /// What the system answered
    pub response: String,

    /// Position in the conversation log (0-based)
    pub index: usize,

    /// When the turn completed
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    /// Record a completed turn.
    pub fn new(user_input: impl Into<String>, response: impl Into<String>, index: usize) -> Self {
        Self {
            user_input: user_input.into(),
            response: response.into(),
            index,
            timestamp: Utc::now(),
        }
    }
}
