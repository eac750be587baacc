//! Minimal RFC 5322 message construction for API sends
//!
//! Produces a `multipart/alternative` message with base64 bodies, plus the
//! reply-all recipient and threading header rules.

use base64::prelude::*;
use std::collections::HashSet;

use crate::models::{EmailAddress, ThreadMessage};
use crate::policy::parse_address_list;

/// An outgoing message ready to be rendered
#[derive(Debug, Clone, Default)]
pub struct MimeMessage {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub body_plain: String,
    pub body_html: Option<String>,
}

impl MimeMessage {
    /// Render the full message with CRLF line endings
    pub fn render(&self) -> String {
        let mut out = String::new();
        push_header(&mut out, "From", &self.from);
        if !self.to.is_empty() {
            push_header(&mut out, "To", &self.to.join(", "));
        }
        if !self.cc.is_empty() {
            push_header(&mut out, "Cc", &self.cc.join(", "));
        }
        push_header(&mut out, "Subject", &encode_header_value(&self.subject));
        if let Some(id) = &self.in_reply_to {
            push_header(&mut out, "In-Reply-To", id);
        }
        if let Some(refs) = &self.references {
            push_header(&mut out, "References", refs);
        }
        push_header(&mut out, "MIME-Version", "1.0");

        match &self.body_html {
            Some(html) => {
                let boundary = boundary();
                push_header(
                    &mut out,
                    "Content-Type",
                    &format!("multipart/alternative; boundary=\"{}\"", boundary),
                );
                out.push_str("\r\n");
                push_part(&mut out, &boundary, "text/plain", &self.body_plain);
                push_part(&mut out, &boundary, "text/html", html);
                out.push_str(&format!("--{}--\r\n", boundary));
            }
            None => {
                push_header(&mut out, "Content-Type", "text/plain; charset=\"UTF-8\"");
                push_header(&mut out, "Content-Transfer-Encoding", "base64");
                out.push_str("\r\n");
                out.push_str(&wrap_base64(self.body_plain.as_bytes()));
            }
        }
        out
    }

    /// The rendered message as Gmail's `raw` field expects it
    pub fn to_raw(&self) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(self.render())
    }
}

/// Reply-all recipients for a reply to `original`
///
/// To is the original sender plus the original To list, Cc is the original
/// Cc list. The account's own addresses are removed and duplicates dropped.
/// When the account itself sent `original`, its To list is reused as-is.
pub fn reply_all_recipients(
    original: &ThreadMessage,
    own_addresses: &[String],
) -> (Vec<String>, Vec<String>) {
    let own: HashSet<String> = own_addresses.iter().map(|a| a.trim().to_lowercase()).collect();
    let mut seen = HashSet::new();
    let mut take = |addrs: Vec<EmailAddress>| -> Vec<String> {
        addrs
            .into_iter()
            .filter(|a| !own.contains(&a.normalized()))
            .filter(|a| seen.insert(a.normalized()))
            .map(|a| format_address(&a))
            .collect()
    };

    let mut to_candidates = parse_address_list(&original.from);
    to_candidates.extend(parse_address_list(&original.to));
    let to = take(to_candidates);
    let cc = take(parse_address_list(&original.cc));
    (to, cc)
}

/// `Re: <subject>` unless it already starts with a reply prefix
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else {
        format!("Re: {}", trimmed)
    }
}

/// `References` for a reply: the original's references plus its Message-ID
pub fn reply_references(original: &ThreadMessage) -> Option<String> {
    let id = original.message_id_header.as_deref()?.trim();
    match original.references.as_deref().map(str::trim) {
        Some(refs) if !refs.is_empty() => Some(format!("{} {}", refs, id)),
        _ => Some(id.to_string()),
    }
}

/// `Name <addr>`, quoting names that contain specials
fn format_address(address: &EmailAddress) -> String {
    match address.name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) if name.contains([',', ';', '<', '>', '@', '"', ':']) => {
            format!("\"{}\" <{}>", name.replace('"', "'"), address.email)
        }
        Some(name) => format!("{} <{}>", name, address.email),
        None => address.email.clone(),
    }
}

fn push_header(out: &mut String, name: &str, value: &str) {
    // Header injection guard: values never span lines
    let value: String = value.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    out.push_str(name);
    out.push_str(": ");
    out.push_str(&value);
    out.push_str("\r\n");
}

fn push_part(out: &mut String, boundary: &str, mime: &str, body: &str) {
    out.push_str(&format!("--{}\r\n", boundary));
    out.push_str(&format!("Content-Type: {}; charset=\"UTF-8\"\r\n", mime));
    out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
    out.push_str(&wrap_base64(body.as_bytes()));
}

fn wrap_base64(bytes: &[u8]) -> String {
    let encoded = BASE64_STANDARD.encode(bytes);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 76 * 2 + 2);
    for chunk in encoded.as_bytes().chunks(76) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
    out
}

/// RFC 2047 encoded-word for non-ASCII header values
fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", BASE64_STANDARD.encode(value))
    }
}

fn boundary() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    format!("=_relay_{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageId, ThreadId};

    fn original() -> ThreadMessage {
        ThreadMessage::builder(MessageId::new("m1"), ThreadId::new("t1"))
            .from("Alice <alice@example.com>")
            .to("bot@example.com, \"Doe, Bob\" <bob@example.com>")
            .cc("carol@example.com, Bot Alias <alias@example.com>, alice@example.com")
            .subject("Budget")
            .message_id_header(Some("<m1@mail.example.com>".to_string()))
            .references(Some("<m0@mail.example.com>".to_string()))
            .build()
    }

    #[test]
    fn test_reply_all_excludes_self_and_aliases() {
        let own = vec!["BOT@example.com".to_string(), "alias@example.com".to_string()];
        let (to, cc) = reply_all_recipients(&original(), &own);
        assert_eq!(to, vec!["Alice <alice@example.com>", "\"Doe, Bob\" <bob@example.com>"]);
        assert_eq!(cc, vec!["carol@example.com"]);
    }

    #[test]
    fn test_reply_subject_and_references() {
        assert_eq!(reply_subject("Budget"), "Re: Budget");
        assert_eq!(reply_subject("RE: Budget"), "RE: Budget");
        assert_eq!(
            reply_references(&original()).as_deref(),
            Some("<m0@mail.example.com> <m1@mail.example.com>")
        );
    }

    #[test]
    fn test_render_multipart() {
        let message = MimeMessage {
            from: "bot@example.com".into(),
            to: vec!["alice@example.com".into()],
            subject: "Re: Café".into(),
            in_reply_to: Some("<m1@mail.example.com>".into()),
            body_plain: "Hello".into(),
            body_html: Some("<p>Hello</p>".into()),
            ..Default::default()
        };
        let rendered = message.render();
        assert!(rendered.contains("Subject: =?UTF-8?B?"));
        assert!(rendered.contains("In-Reply-To: <m1@mail.example.com>\r\n"));
        assert!(rendered.contains("multipart/alternative"));
        assert!(rendered.contains(&BASE64_STANDARD.encode("<p>Hello</p>")));
        assert!(rendered.trim_end().ends_with("--"));
        assert!(!message.to_raw().contains('+'));
    }

    #[test]
    fn test_header_values_cannot_inject_lines() {
        let message = MimeMessage {
            from: "bot@example.com".into(),
            to: vec!["a@example.com\r\nBcc: evil@example.com".into()],
            subject: "Hi".into(),
            body_plain: "x".into(),
            ..Default::default()
        };
        assert!(!message.render().contains("\r\nBcc:"));
    }
}
