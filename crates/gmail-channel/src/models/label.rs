//! Label model representing a Gmail label, plus send-as identities

use serde::{Deserialize, Serialize};

/// Unique identifier for a label (Gmail label ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelId(pub String);

impl LabelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Well-known Gmail system labels
    pub const INBOX: &'static str = "INBOX";
    pub const SENT: &'static str = "SENT";
    pub const UNREAD: &'static str = "UNREAD";

    /// User label applied to mail from senders outside the inbound allow-list
    pub const QUARANTINE: &'static str = "not-allow-listed";
}

impl From<String> for LabelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LabelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A mail label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Label ID (e.g., "INBOX", "Label_123")
    pub id: LabelId,
    /// Display name
    pub name: String,
    /// Whether this is a system label
    #[serde(default)]
    pub is_system: bool,
}

impl Label {
    /// Create a new user label
    pub fn new(id: impl Into<LabelId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_system: false,
        }
    }

    /// Create a system label
    pub fn system(id: impl Into<LabelId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_system: true,
        }
    }

    /// Whether this label answers to `name_or_id` (case-insensitive on the name)
    pub fn matches(&self, name_or_id: &str) -> bool {
        self.id.as_str() == name_or_id || self.name.eq_ignore_ascii_case(name_or_id)
    }
}

/// A send-as identity configured on the mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAs {
    pub send_as_email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_primary: bool,
}
