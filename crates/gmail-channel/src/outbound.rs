//! Outbound replies
//!
//! Order matters: the recipient policy is checked before any other work,
//! the quote is fetched only for quoted thread replies, and archiving runs
//! detached after the send has already succeeded.

use log::{debug, info, warn};
use pulldown_cmark::{Options, Parser, html};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::GmailError;
use crate::gmail::{GmailClient, LabelDelta, SendRequest, SentMessage};
use crate::models::{Account, ChannelDefaults, MessageId, ThreadId, ThreadReplyPolicy};
use crate::policy::{PolicyError, validate_thread_reply};
use crate::quote::build_quote;
use crate::sanitize::sanitize_html;

/// Errors from [`OutboundSender::send_reply`]
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("send failed: {0}")]
    Gmail(#[from] GmailError),

    #[error("invalid reply: {0}")]
    InvalidRequest(String),
}

/// A reply produced by the agent
#[derive(Debug, Clone, Default)]
pub struct ReplyRequest {
    /// Thread to reply into
    pub thread_id: Option<ThreadId>,
    /// Specific message to reply to; wins over `thread_id` for addressing
    pub reply_to_message_id: Option<MessageId>,
    /// Markdown reply text
    pub text: String,
    /// Subject override; replies default to `Re: <original>`
    pub subject: Option<String>,
}

impl ReplyRequest {
    pub fn to_thread(thread_id: impl Into<ThreadId>, text: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn to_message(message_id: MessageId, text: impl Into<String>) -> Self {
        Self {
            reply_to_message_id: Some(message_id),
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Result of a successful send
#[derive(Debug)]
pub struct SendReport {
    pub message: SentMessage,
    /// The detached archive task, when one was started. Dropping it does not
    /// cancel the archive.
    pub archive: Option<JoinHandle<()>>,
}

/// Sends agent replies for one account
pub struct OutboundSender {
    client: Arc<dyn GmailClient>,
    account: watch::Receiver<Account>,
    defaults: ChannelDefaults,
}

impl OutboundSender {
    /// Create a sender
    ///
    /// # Arguments
    /// * `client` - The account's Gmail client
    /// * `account` - Live account settings; read fresh for every reply
    /// * `defaults` - Channel-level defaults for unset account settings
    pub fn new(
        client: Arc<dyn GmailClient>,
        account: watch::Receiver<Account>,
        defaults: ChannelDefaults,
    ) -> Self {
        Self {
            client,
            account,
            defaults,
        }
    }

    /// Validate, render and send a reply
    pub async fn send_reply(&self, reply: &ReplyRequest) -> Result<SendReport, SendError> {
        if reply.text.trim().is_empty() {
            return Err(SendError::InvalidRequest("reply text is empty".to_string()));
        }
        if reply.thread_id.is_none() && reply.reply_to_message_id.is_none() {
            return Err(SendError::InvalidRequest(
                "reply needs a thread id or a message id".to_string(),
            ));
        }

        let account = self.account.borrow().clone();
        let settings = account.resolve(&self.defaults);

        let thread_id = self
            .thread_for(reply, settings.thread_reply_policy, settings.include_quote)
            .await?;

        if let Some(thread_id) = &thread_id {
            validate_thread_reply(
                self.client.as_ref(),
                thread_id,
                &account.email,
                &account.allow_outbound_to,
                settings.thread_reply_policy,
            )
            .await?;
        } else if settings.thread_reply_policy != ThreadReplyPolicy::Open
            && let Some(message_id) = &reply.reply_to_message_id
        {
            return Err(PolicyError::MessageUnavailable(message_id.clone()).into());
        }

        let mut body_html = render_markdown(&reply.text);
        let mut body_plain = reply.text.trim().to_string();

        if settings.include_quote
            && let Some(thread_id) = &thread_id
        {
            match self.client.get_thread(thread_id).await {
                Ok(Some(thread)) => {
                    if let Some(quote) = build_quote(&thread.messages, &account.email) {
                        body_html.push_str("<br><br>");
                        body_html.push_str(&quote.to_html());
                        body_plain.push_str("\n\n");
                        body_plain.push_str(&quote.to_plain());
                    }
                }
                Ok(None) => debug!("{}: thread {} vanished, sending without quote", account.email, thread_id),
                Err(e) => warn!("{}: could not fetch quote for {}: {}", account.email, thread_id, e),
            }
        }

        let request = SendRequest {
            thread_id: thread_id.clone(),
            reply_to_message_id: reply.reply_to_message_id.clone(),
            to: Vec::new(),
            subject: reply.subject.clone(),
            body_plain,
            body_html: Some(body_html),
            reply_all: true,
        };
        let message = self.client.send(&request).await?;
        info!(
            "{}: sent reply {} into thread {}",
            account.email,
            message.id,
            thread_id.as_ref().map(ThreadId::as_str).unwrap_or("-")
        );

        let archive = match &thread_id {
            Some(thread_id) if settings.archive_on_reply => {
                Some(spawn_archive(Arc::clone(&self.client), account.email.clone(), thread_id.clone()))
            }
            _ => None,
        };

        Ok(SendReport { message, archive })
    }

    /// The thread the reply lands in, looked up from the message id only when
    /// a policy check or quote needs it
    async fn thread_for(
        &self,
        reply: &ReplyRequest,
        policy: ThreadReplyPolicy,
        include_quote: bool,
    ) -> Result<Option<ThreadId>, SendError> {
        if let Some(thread_id) = reply.thread_id.as_ref().filter(|t| !t.is_empty()) {
            return Ok(Some(thread_id.clone()));
        }
        let Some(message_id) = &reply.reply_to_message_id else {
            return Ok(None);
        };
        if policy == ThreadReplyPolicy::Open && !include_quote {
            return Ok(None);
        }
        let message = self
            .client
            .get_message(message_id)
            .await
            .map_err(PolicyError::Lookup)?;
        Ok(message.map(|m| m.thread_id).filter(|t| !t.is_empty()))
    }
}

/// Markdown to scrubbed HTML
pub fn render_markdown(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    let parser = Parser::new_ext(text, options);
    let mut rendered = String::new();
    html::push_html(&mut rendered, parser);
    sanitize_html(&rendered)
}

/// Remove INBOX from the thread without making the caller wait
fn spawn_archive(client: Arc<dyn GmailClient>, account: String, thread_id: ThreadId) -> JoinHandle<()> {
    tokio::spawn(async move {
        match client.modify_thread_labels(&thread_id, &LabelDelta::archive()).await {
            Ok(()) => debug!("{}: archived thread {}", account, thread_id),
            Err(e) => warn!("{}: failed to archive thread {}: {}", account, thread_id, e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_markdown_is_scrubbed() {
        let html = render_markdown("**Done**, see [docs](https://example.com)\n\n<script>alert(1)</script>");
        assert!(html.contains("<strong>Done</strong>"));
        assert!(html.contains(r#"<a href="https://example.com">docs</a>"#));
        assert!(!html.contains("script"));
    }

    #[test]
    fn test_render_markdown_lists() {
        let html = render_markdown("- one\n- two");
        assert!(html.contains("<ul>"));
        assert!(html.contains("<li>one</li>"));
    }

    #[test]
    fn test_send_error_display_passes_policy_message_through() {
        let err: SendError = PolicyError::Blocked {
            policy: ThreadReplyPolicy::SenderOnly,
            recipients: vec!["x@evil.com".into()],
        }
        .into();
        assert!(err.to_string().contains("x@evil.com"));
        assert!(err.to_string().contains("relax policy"));
    }
}
