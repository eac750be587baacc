//! Gmail channel - Bridges monitored Gmail mailboxes to an agent
//!
//! This crate provides:
//! - Domain models (Account, ThreadMessage, InboundMessage, Label)
//! - A Gmail client abstraction with API and CLI backends
//! - A circuit breaker with retry and backoff for backend calls
//! - Email body sanitizing and Gmail-style reply quoting
//! - Inbound allow-listing with quarantine, and outbound reply policy
//! - A polling sync engine that dispatches new mail to an injected handler
//! - A local session store for attachment cache housekeeping

pub mod config;
pub mod error;
pub mod gmail;
pub mod models;
pub mod outbound;
pub mod policy;
pub mod quote;
pub mod sanitize;
pub mod session;
pub mod sync;

pub use config::{GmailCredentials, RelayConfig};
pub use error::GmailError;
pub use gmail::{
    ApiGmailClient, CircuitBreaker, CircuitState, CliGmailClient, GmailClient, LabelDelta, RetryPolicy,
    SendRequest, SentMessage, ensure_label,
};
pub use models::{
    Account, Attachment, Backend, ChannelDefaults, EmailAddress, InboundMessage, Label, LabelId, MessageId,
    Sender, ThreadId, ThreadMessage, ThreadReplyPolicy, ThreadResponse, ThreadSummary,
};
pub use outbound::{OutboundSender, ReplyRequest, SendError, SendReport, render_markdown};
pub use policy::{PolicyError, is_email_allowed, validate_thread_reply};
pub use quote::{QuotedContent, build_quote};
pub use sanitize::{SanitizeOptions, sanitize, sanitize_with};
pub use session::{FileSessionStore, PruneStats, SessionStore, session_key, session_prefix};
pub use sync::{
    AccountStatus, DispatchLimiter, InboundHandler, InboxSync, Monitor, PassStats, StatusSink,
};
