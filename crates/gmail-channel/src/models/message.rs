//! Message model representing a Gmail message inside a thread

use super::ThreadId;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Parse an RFC 2822 date, tolerating a trailing `(UTC)`-style comment
pub fn parse_date_header(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(value).ok().or_else(|| {
        let without_comment = value.split(" (").next()?.trim();
        DateTime::parse_from_rfc2822(without_comment).ok()
    })
}

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Parse an email address from a string like `"John Doe" <john@example.com>`
    ///
    /// Surrounding quotes are stripped from the display name.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        // Try to parse "Name <email>" format
        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = unquote(s[..angle_start].trim());
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                email: email.to_string(),
            };
        }

        // Otherwise, treat the whole string as an email
        Self {
            name: None,
            email: s.to_string(),
        }
    }

    /// Whether the address part looks like a mailbox (contains `@`)
    pub fn is_valid(&self) -> bool {
        self.email.contains('@')
    }

    /// Lowercased address, used for every comparison
    pub fn normalized(&self) -> String {
        self.email.trim().to_lowercase()
    }

    /// Format the email address for display
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].trim()
    } else {
        s
    }
}

/// Attachment metadata extracted from a MIME part tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub attachment_id: String,
    #[serde(default)]
    pub size: u64,
}

/// A single message of a Gmail thread, normalized across backends
///
/// Address headers are kept as the raw header values; use
/// [`crate::policy::parse_address_list`] to split them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMessage {
    /// Gmail message ID
    pub id: MessageId,
    /// ID of the thread this message belongs to
    pub thread_id: ThreadId,
    /// Raw `From` header
    pub from: String,
    /// Raw `To` header
    pub to: String,
    /// Raw `Cc` header
    pub cc: String,
    /// Raw `Date` header
    pub date: String,
    /// Subject line
    pub subject: String,
    /// RFC 5322 `Message-ID` header, used for reply threading
    pub message_id_header: Option<String>,
    /// RFC 5322 `References` header
    pub references: Option<String>,
    /// Plain text body
    pub body_plain: Option<String>,
    /// HTML body
    pub body_html: Option<String>,
    /// Gmail's snippet
    pub snippet: String,
    /// Gmail label IDs (e.g., "INBOX", "SENT", "UNREAD")
    pub label_ids: Vec<String>,
    /// Gmail's internal timestamp (milliseconds since epoch)
    pub internal_date: i64,
    /// Attachments found anywhere in the part tree
    pub attachments: Vec<Attachment>,
}

impl ThreadMessage {
    /// Create a new message builder
    pub fn builder(id: MessageId, thread_id: ThreadId) -> ThreadMessageBuilder {
        ThreadMessageBuilder::new(id, thread_id)
    }

    /// Parsed sender address
    pub fn sender(&self) -> EmailAddress {
        EmailAddress::parse(&self.from)
    }

    /// Milliseconds since the epoch: Gmail's internal date, else the `Date` header
    ///
    /// Returns 0 when neither is usable.
    pub fn timestamp_millis(&self) -> i64 {
        if self.internal_date > 0 {
            return self.internal_date;
        }
        parse_date_header(&self.date)
            .map(|d| d.timestamp_millis())
            .unwrap_or(0)
    }

    /// When the message was received
    pub fn received_at(&self) -> DateTime<Utc> {
        match self.timestamp_millis() {
            0 => Utc::now(),
            millis => Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now),
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label_ids.iter().any(|l| l == label)
    }
}

/// Builder for creating ThreadMessage instances
pub struct ThreadMessageBuilder {
    message: ThreadMessage,
}

impl ThreadMessageBuilder {
    fn new(id: MessageId, thread_id: ThreadId) -> Self {
        Self {
            message: ThreadMessage {
                id,
                thread_id,
                from: String::new(),
                to: String::new(),
                cc: String::new(),
                date: String::new(),
                subject: String::new(),
                message_id_header: None,
                references: None,
                body_plain: None,
                body_html: None,
                snippet: String::new(),
                label_ids: Vec::new(),
                internal_date: 0,
                attachments: Vec::new(),
            },
        }
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.message.from = from.into();
        self
    }

    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.message.to = to.into();
        self
    }

    pub fn cc(mut self, cc: impl Into<String>) -> Self {
        self.message.cc = cc.into();
        self
    }

    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.message.date = date.into();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.message.subject = subject.into();
        self
    }

    pub fn message_id_header(mut self, header: Option<String>) -> Self {
        self.message.message_id_header = header;
        self
    }

    pub fn references(mut self, references: Option<String>) -> Self {
        self.message.references = references;
        self
    }

    pub fn body_plain(mut self, body: Option<String>) -> Self {
        self.message.body_plain = body;
        self
    }

    pub fn body_html(mut self, body: Option<String>) -> Self {
        self.message.body_html = body;
        self
    }

    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.message.snippet = snippet.into();
        self
    }

    pub fn label_ids(mut self, label_ids: Vec<String>) -> Self {
        self.message.label_ids = label_ids;
        self
    }

    pub fn internal_date(mut self, internal_date: i64) -> Self {
        self.message.internal_date = internal_date;
        self
    }

    pub fn attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.message.attachments = attachments;
        self
    }

    pub fn build(self) -> ThreadMessage {
        self.message
    }
}
