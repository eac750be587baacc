//! Account model representing a monitored Gmail mailbox
//!
//! An `Account` is immutable for the duration of one polling cycle. The
//! monitor re-reads it between cycles so configuration changes take effect
//! without a restart.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which recipients an outbound thread reply may reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThreadReplyPolicy {
    /// Reply to anyone
    Open,
    /// Only the thread originator must be allow-listed
    SenderOnly,
    /// Every participant must be allow-listed
    Allowlist,
}

impl std::fmt::Display for ThreadReplyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::SenderOnly => "sender-only",
            Self::Allowlist => "allowlist",
        };
        f.write_str(name)
    }
}

/// Which client implementation talks to Gmail for this account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backend {
    /// Shell out to a Gmail CLI that prints JSON
    Cli {
        #[serde(default = "default_cli_executable")]
        executable: String,
    },
    /// Call the Gmail REST API directly with OAuth2 credentials
    Api,
}

fn default_cli_executable() -> String {
    "gog".into()
}

impl Default for Backend {
    fn default() -> Self {
        Self::Cli {
            executable: default_cli_executable(),
        }
    }
}

/// A monitored Gmail account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Mailbox address, also the account id
    pub email: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between sync passes
    #[serde(default = "default_poll_interval", alias = "pollIntervalSecs")]
    pub poll_interval_secs: u64,

    /// Inbound allow-list. Empty = nobody gets through.
    #[serde(default, alias = "allowFrom")]
    pub allow_from: Vec<String>,

    /// Outbound allow-list. Empty = no restriction.
    #[serde(default, alias = "allowOutboundTo")]
    pub allow_outbound_to: Vec<String>,

    #[serde(default, alias = "threadReplyPolicy")]
    pub thread_reply_policy: Option<ThreadReplyPolicy>,

    #[serde(default, alias = "archiveOnReply")]
    pub archive_on_reply: Option<bool>,

    #[serde(default, alias = "includeQuote")]
    pub include_quote: Option<bool>,

    #[serde(default)]
    pub backend: Backend,

    /// How long an idle session (and its attachment cache) is kept
    #[serde(default = "default_session_ttl", alias = "sessionTtlSecs")]
    pub session_ttl_secs: u64,

    #[serde(default = "default_true", alias = "downloadAttachments")]
    pub download_attachments: bool,

    #[serde(default = "default_max_attachment_bytes", alias = "maxAttachmentBytes")]
    pub max_attachment_bytes: u64,
}

fn default_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    60
}
fn default_session_ttl() -> u64 {
    24 * 60 * 60
}
fn default_max_attachment_bytes() -> u64 {
    25 * 1024 * 1024
}

impl Account {
    /// Create an account with default settings
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            enabled: true,
            poll_interval_secs: default_poll_interval(),
            allow_from: Vec::new(),
            allow_outbound_to: Vec::new(),
            thread_reply_policy: None,
            archive_on_reply: None,
            include_quote: None,
            backend: Backend::default(),
            session_ttl_secs: default_session_ttl(),
            download_attachments: true,
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }

    pub fn with_allow_from(mut self, allow_from: Vec<String>) -> Self {
        self.allow_from = allow_from;
        self
    }

    pub fn with_allow_outbound_to(mut self, allow: Vec<String>) -> Self {
        self.allow_outbound_to = allow;
        self
    }

    pub fn with_thread_reply_policy(mut self, policy: ThreadReplyPolicy) -> Self {
        self.thread_reply_policy = Some(policy);
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Case-insensitive check against the account's own address
    pub fn is_self(&self, address: &str) -> bool {
        address.trim().eq_ignore_ascii_case(self.email.trim())
    }

    /// Resolve outbound settings: account override, then channel default, then hard default
    pub fn resolve(&self, defaults: &ChannelDefaults) -> ResolvedSettings {
        ResolvedSettings {
            thread_reply_policy: self
                .thread_reply_policy
                .or(defaults.thread_reply_policy)
                .unwrap_or(ThreadReplyPolicy::Open),
            include_quote: self.include_quote.or(defaults.include_quote).unwrap_or(true),
            archive_on_reply: self
                .archive_on_reply
                .or(defaults.archive_on_reply)
                .unwrap_or(false),
        }
    }
}

/// Channel-level defaults shared by every account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelDefaults {
    #[serde(default, alias = "threadReplyPolicy")]
    pub thread_reply_policy: Option<ThreadReplyPolicy>,
    #[serde(default, alias = "includeQuote")]
    pub include_quote: Option<bool>,
    #[serde(default, alias = "archiveOnReply")]
    pub archive_on_reply: Option<bool>,
    /// Root directory for downloaded attachments
    #[serde(default, alias = "attachmentsDir")]
    pub attachments_dir: Option<PathBuf>,
}

/// Effective outbound settings after override resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub thread_reply_policy: ThreadReplyPolicy,
    pub include_quote: bool,
    pub archive_on_reply: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_new_defaults() {
        let account = Account::new("bot@example.com");
        assert!(account.enabled);
        assert_eq!(account.poll_interval_secs, 60);
        assert!(account.allow_from.is_empty());
        assert_eq!(account.backend, Backend::Cli { executable: "gog".into() });
    }

    #[test]
    fn test_account_deserializes_camel_case() {
        let json = r#"{
            "email": "bot@example.com",
            "pollIntervalSecs": 15,
            "allowFrom": ["@trusted.com"],
            "allowOutboundTo": ["a@x.com"],
            "threadReplyPolicy": "sender-only",
            "archiveOnReply": true,
            "backend": { "type": "api" }
        }"#;
        let account: Account = serde_json::from_str(json).unwrap();
        assert_eq!(account.poll_interval_secs, 15);
        assert_eq!(account.allow_from, vec!["@trusted.com"]);
        assert_eq!(account.thread_reply_policy, Some(ThreadReplyPolicy::SenderOnly));
        assert_eq!(account.archive_on_reply, Some(true));
        assert_eq!(account.backend, Backend::Api);
        assert!(account.download_attachments);
    }

    #[test]
    fn test_resolve_prefers_account_then_channel_then_default() {
        let defaults = ChannelDefaults {
            thread_reply_policy: Some(ThreadReplyPolicy::Allowlist),
            include_quote: Some(false),
            archive_on_reply: None,
            attachments_dir: None,
        };

        let account = Account::new("bot@example.com");
        let resolved = account.resolve(&defaults);
        assert_eq!(resolved.thread_reply_policy, ThreadReplyPolicy::Allowlist);
        assert!(!resolved.include_quote);
        assert!(!resolved.archive_on_reply);

        let account = account.with_thread_reply_policy(ThreadReplyPolicy::Open);
        assert_eq!(account.resolve(&defaults).thread_reply_policy, ThreadReplyPolicy::Open);

        let resolved = Account::new("bot@example.com").resolve(&ChannelDefaults::default());
        assert_eq!(resolved.thread_reply_policy, ThreadReplyPolicy::Open);
        assert!(resolved.include_quote);
    }

    #[test]
    fn test_is_self_case_insensitive() {
        let account = Account::new("Bot@Example.com");
        assert!(account.is_self("bot@example.com "));
        assert!(!account.is_self("other@example.com"));
    }
}
