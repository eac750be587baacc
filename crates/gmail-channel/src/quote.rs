//! Quoted-reply reconstruction
//!
//! Gmail nests earlier history inside each message body, so a reply quotes
//! only the most recent message that was not written by the account itself.

use crate::models::{EmailAddress, ThreadMessage, parse_date_header};
use crate::sanitize::{SanitizeOptions, escape_html, sanitize_html, sanitize_with};

/// A rendered quote block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedContent {
    /// e.g. `On Tue, Mar 5, 2024 at 9:15 AM, Alice wrote:`
    pub header: String,
    pub body_html: String,
    /// Every line prefixed with `> `
    pub body_plain: String,
}

impl QuotedContent {
    /// The HTML block placed under a reply
    pub fn to_html(&self) -> String {
        format!(
            "<div class=\"gmail_quote\"><div class=\"gmail_attr\">{}</div><blockquote class=\"gmail_quote\" style=\"margin:0 0 0 .8ex;border-left:1px #ccc solid;padding-left:1ex\">{}</blockquote></div>",
            escape_html(&self.header),
            self.body_html
        )
    }

    /// The plain-text block placed under a reply
    pub fn to_plain(&self) -> String {
        format!("{}\n{}", self.header, self.body_plain)
    }
}

/// Build the quote for a reply into a thread
///
/// # Arguments
/// * `messages` - Thread messages in provider order (oldest first)
/// * `account_email` - The replying account; its own messages are never quoted
///
/// Returns `None` when every message was sent by the account.
pub fn build_quote(messages: &[ThreadMessage], account_email: &str) -> Option<QuotedContent> {
    let account = account_email.trim().to_lowercase();
    let quoted = messages
        .iter()
        .filter(|m| m.sender().normalized() != account)
        .next_back()?;

    let header = format!(
        "On {}, {} wrote:",
        format_quote_date(quoted),
        display_name(&quoted.from)
    );

    let plain = quoted
        .body_plain
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .map(|b| b.replace("\r\n", "\n").trim_end().to_string())
        .or_else(|| {
            quoted
                .body_html
                .as_deref()
                .map(|h| sanitize_with(h, SanitizeOptions { strip_signature: false }))
        })
        .unwrap_or_else(|| quoted.snippet.clone());

    let body_html = quoted
        .body_html
        .as_deref()
        .map(sanitize_html)
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| escape_html(&plain).replace('\n', "<br>"));

    let body_plain = plain
        .lines()
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n");

    Some(QuotedContent {
        header,
        body_html,
        body_plain,
    })
}

/// `Name` from `"Name" <addr>`, otherwise the raw header value
fn display_name(from_header: &str) -> String {
    match EmailAddress::parse(from_header).name {
        Some(name) => name,
        None => from_header.trim().to_string(),
    }
}

fn format_quote_date(message: &ThreadMessage) -> String {
    const FORMAT: &str = "%a, %b %-d, %Y at %-I:%M %p";

    if let Some(date) = parse_date_header(&message.date) {
        return date.format(FORMAT).to_string();
    }
    if message.internal_date > 0 {
        return message.received_at().format(FORMAT).to_string();
    }
    message.date.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageId, ThreadId};

    fn msg(id: &str, from: &str, plain: &str) -> ThreadMessage {
        ThreadMessage::builder(MessageId::new(id), ThreadId::new("t1"))
            .from(from)
            .date("Tue, 5 Mar 2024 09:15:00 +0000")
            .body_plain(Some(plain.to_string()))
            .build()
    }

    #[test]
    fn test_quotes_last_message_not_from_account() {
        let messages = vec![
            msg("m1", "Alice <alice@example.com>", "First"),
            msg("m2", "Bot <bot@example.com>", "Bot reply"),
            msg("m3", "\"Carol Smith\" <carol@example.com>", "Third"),
        ];
        let quote = build_quote(&messages, "bot@example.com").unwrap();
        assert_eq!(quote.header, "On Tue, Mar 5, 2024 at 9:15 AM, Carol Smith wrote:");
        assert_eq!(quote.body_plain, "> Third");
        assert!(!quote.header.contains("Bot"));
    }

    #[test]
    fn test_skips_trailing_own_message() {
        let messages = vec![
            msg("m1", "Alice <alice@example.com>", "Question?"),
            msg("m2", "BOT@example.com", "Answer"),
        ];
        let quote = build_quote(&messages, "bot@example.com").unwrap();
        assert!(quote.header.ends_with("Alice wrote:"));
    }

    #[test]
    fn test_no_quote_when_only_own_messages() {
        let messages = vec![msg("m1", "bot@example.com", "Note to self")];
        assert!(build_quote(&messages, "bot@example.com").is_none());
        assert!(build_quote(&[], "bot@example.com").is_none());
    }

    #[test]
    fn test_bare_address_used_when_no_display_name() {
        let messages = vec![msg("m1", "alice@example.com", "Hi")];
        let quote = build_quote(&messages, "bot@example.com").unwrap();
        assert!(quote.header.ends_with(", alice@example.com wrote:"));
    }

    #[test]
    fn test_html_body_is_scrubbed_and_plain_is_prefixed() {
        let message = ThreadMessage::builder(MessageId::new("m1"), ThreadId::new("t1"))
            .from("Alice <alice@example.com>")
            .date("Tue, 5 Mar 2024 09:15:00 +0000 (UTC)")
            .body_plain(Some("line one\nline two".to_string()))
            .body_html(Some("<div>line one<script>x()</script><br>line two</div>".to_string()))
            .build();
        let quote = build_quote(&[message], "bot@example.com").unwrap();
        assert_eq!(quote.body_html, "<div>line one<br>line two</div>");
        assert_eq!(quote.body_plain, "> line one\n> line two");
        assert!(quote.header.starts_with("On Tue, Mar 5, 2024"));
    }

    #[test]
    fn test_plain_only_message_renders_escaped_html() {
        let messages = vec![msg("m1", "alice@example.com", "a < b\nc")];
        let quote = build_quote(&messages, "bot@example.com").unwrap();
        assert_eq!(quote.body_html, "a &lt; b<br>c");
        assert!(quote.to_html().contains("gmail_quote"));
        assert!(quote.to_plain().starts_with("On "));
    }
}
