//! The Gmail capability interface
//!
//! Everything downstream of account construction talks to Gmail through
//! [`GmailClient`] and never branches on which backend is behind it.

use async_trait::async_trait;
use log::{debug, info};
use std::path::Path;

use crate::error::GmailError;
use crate::models::{
    Label, LabelId, MessageId, SendAs, ThreadId, ThreadMessage, ThreadResponse, ThreadSummary,
};

/// Labels to add and remove in one modify call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelDelta {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl LabelDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, label: impl Into<String>) -> Self {
        self.add.push(label.into());
        self
    }

    pub fn remove(mut self, label: impl Into<String>) -> Self {
        self.remove.push(label.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Remove `UNREAD`
    pub fn mark_read() -> Self {
        Self::new().remove(LabelId::UNREAD)
    }

    /// Move out of the inbox into quarantine
    pub fn quarantine() -> Self {
        Self::new().add(LabelId::QUARANTINE).remove(LabelId::INBOX)
    }

    /// Remove `INBOX`
    pub fn archive() -> Self {
        Self::new().remove(LabelId::INBOX)
    }
}

/// An outgoing message
///
/// Replies set `thread_id` and/or `reply_to_message_id`; a fresh message
/// needs explicit `to` recipients.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub thread_id: Option<ThreadId>,
    pub reply_to_message_id: Option<MessageId>,
    pub to: Vec<String>,
    pub subject: Option<String>,
    pub body_plain: String,
    pub body_html: Option<String>,
    /// Address everyone on the replied-to message, not just its sender
    pub reply_all: bool,
}

impl SendRequest {
    pub fn is_reply(&self) -> bool {
        self.thread_id.is_some() || self.reply_to_message_id.is_some()
    }

    /// Reject requests no backend could deliver
    pub fn validate(&self) -> Result<(), GmailError> {
        if !self.is_reply() && self.to.is_empty() {
            return Err(GmailError::InvalidRequest(
                "send needs a thread, a message to reply to, or recipients".to_string(),
            ));
        }
        if self.body_plain.trim().is_empty()
            && self.body_html.as_deref().is_none_or(|h| h.trim().is_empty())
        {
            return Err(GmailError::InvalidRequest("send needs a body".to_string()));
        }
        Ok(())
    }
}

/// What the provider returned for a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
}

/// Capability interface over a single Gmail account
///
/// Read operations return `None` or an empty collection when the provider
/// says the resource does not exist; only transport, auth and server
/// failures are errors. `send` never reports partial success.
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// Verify the backend can be used at all (tooling present, credentials valid)
    async fn probe(&self) -> Result<(), GmailError>;

    async fn send(&self, request: &SendRequest) -> Result<SentMessage, GmailError>;

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<ThreadResponse>, GmailError>;

    async fn get_message(&self, id: &MessageId) -> Result<Option<ThreadMessage>, GmailError>;

    /// Search messages with full bodies
    ///
    /// # Arguments
    /// * `query` - Gmail search syntax, e.g. `in:inbox is:unread`
    /// * `max_results` - Page size
    async fn search_messages(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<ThreadMessage>, GmailError>;

    async fn search_threads(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<ThreadSummary>, GmailError>;

    async fn modify_labels(&self, ids: &[MessageId], delta: &LabelDelta) -> Result<(), GmailError>;

    async fn modify_thread_labels(
        &self,
        id: &ThreadId,
        delta: &LabelDelta,
    ) -> Result<(), GmailError>;

    async fn list_labels(&self) -> Result<Vec<Label>, GmailError>;

    async fn create_label(&self, name: &str) -> Result<Label, GmailError>;

    /// Download one attachment to `dest`, creating parent directories
    async fn download_attachment(
        &self,
        message_id: &MessageId,
        attachment_id: &str,
        dest: &Path,
    ) -> Result<(), GmailError>;

    /// Send-as identities (the account address and its aliases)
    async fn get_send_as(&self) -> Result<Vec<SendAs>, GmailError>;
}

/// Find a label by name, creating it if absent
pub async fn ensure_label(client: &dyn GmailClient, name: &str) -> Result<Label, GmailError> {
    let labels = client.list_labels().await?;
    if let Some(label) = labels.into_iter().find(|l| l.matches(name)) {
        debug!("Label {} already exists as {}", name, label.id.as_str());
        return Ok(label);
    }
    let label = client.create_label(name).await?;
    info!("Created label {} ({})", name, label.id.as_str());
    Ok(label)
}
