//! Allow-list matching and the outbound recipient policy
//!
//! The same matcher gates inbound senders and outbound recipients. What an
//! empty list means differs by call site: inbound treats it as "nobody",
//! outbound as "no restriction".

use std::collections::BTreeSet;

use crate::error::GmailError;
use crate::gmail::GmailClient;
use crate::models::{EmailAddress, MessageId, ThreadId, ThreadReplyPolicy};

/// Errors from outbound policy validation
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error(
        "reply blocked by {policy} policy: {} not in the outbound allow-list (add to allow-list or relax policy)",
        .recipients.join(", ")
    )]
    Blocked {
        policy: ThreadReplyPolicy,
        recipients: Vec<String>,
    },

    #[error("cannot verify recipients: thread {0} not found")]
    ThreadUnavailable(ThreadId),

    #[error("cannot verify recipients: message {0} not found")]
    MessageUnavailable(MessageId),

    #[error("thread lookup failed: {0}")]
    Lookup(#[from] GmailError),
}

/// Check one address against an allow-list
///
/// Entries are exact addresses, `@domain` suffixes, or `*`. Matching is
/// case-insensitive. An empty list matches nothing; callers decide what an
/// empty list means for them.
pub fn is_email_allowed(email: &str, allow_list: &[String]) -> bool {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return false;
    }
    allow_list.iter().any(|entry| {
        let entry = entry.trim().to_lowercase();
        if entry == "*" {
            true
        } else if entry.starts_with('@') {
            email.ends_with(&entry)
        } else {
            !entry.is_empty() && email == entry
        }
    })
}

/// Inbound gate: an empty allow-list admits nobody
pub fn is_sender_allowed(email: &str, allow_from: &[String]) -> bool {
    !allow_from.is_empty() && is_email_allowed(email, allow_from)
}

/// Outbound gate: an empty allow-list admits everybody
pub fn is_recipient_allowed(email: &str, allow_outbound_to: &[String]) -> bool {
    allow_outbound_to.is_empty() || is_email_allowed(email, allow_outbound_to)
}

/// Split an address header into addresses
///
/// Commas inside quoted display names do not split. Entries without an
/// `@` are discarded.
pub fn parse_address_list(header: &str) -> Vec<EmailAddress> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in header.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(EmailAddress::parse)
        .filter(EmailAddress::is_valid)
        .collect()
}

/// Decide whether a reply into `thread_id` may be sent
///
/// # Arguments
/// * `client` - Used to fetch the thread for non-open policies
/// * `thread_id` - Thread being replied to
/// * `account_email` - The sending account, excluded from `allowlist` participants
/// * `allow_outbound_to` - Outbound allow-list (empty = unrestricted)
/// * `policy` - Which participants must be allow-listed
pub async fn validate_thread_reply(
    client: &dyn GmailClient,
    thread_id: &ThreadId,
    account_email: &str,
    allow_outbound_to: &[String],
    policy: ThreadReplyPolicy,
) -> Result<(), PolicyError> {
    if policy == ThreadReplyPolicy::Open {
        return Ok(());
    }

    let thread = client
        .get_thread(thread_id)
        .await?
        .ok_or_else(|| PolicyError::ThreadUnavailable(thread_id.clone()))?;

    let account = account_email.trim().to_lowercase();
    let blocked: Vec<String> = match policy {
        ThreadReplyPolicy::Open => Vec::new(),
        ThreadReplyPolicy::SenderOnly => {
            let originator = thread
                .messages
                .first()
                .map(|m| m.sender())
                .filter(EmailAddress::is_valid)
                .ok_or_else(|| PolicyError::ThreadUnavailable(thread_id.clone()))?;
            let address = originator.normalized();
            if is_recipient_allowed(&address, allow_outbound_to) {
                Vec::new()
            } else {
                vec![address]
            }
        }
        ThreadReplyPolicy::Allowlist => {
            let participants: BTreeSet<String> = thread
                .messages
                .iter()
                .flat_map(|m| {
                    [m.from.as_str(), m.to.as_str(), m.cc.as_str()]
                        .into_iter()
                        .flat_map(parse_address_list)
                        .collect::<Vec<_>>()
                })
                .map(|a| a.normalized())
                .filter(|a| *a != account)
                .collect();
            participants
                .into_iter()
                .filter(|a| !is_recipient_allowed(a, allow_outbound_to))
                .collect()
        }
    };

    if blocked.is_empty() {
        Ok(())
    } else {
        Err(PolicyError::Blocked {
            policy,
            recipients: blocked,
        })
    }
}
