//! Thread model representing a Gmail thread (conversation)

use serde::{Deserialize, Serialize};

use super::ThreadMessage;

/// Unique identifier for a thread (Gmail thread ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A full thread as returned by the provider
///
/// Built fresh for every quote or validation request and never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResponse {
    pub id: ThreadId,
    pub history_id: Option<String>,
    /// Messages in provider order (oldest first)
    pub messages: Vec<ThreadMessage>,
}

/// A thread search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub id: ThreadId,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub history_id: Option<String>,
}
