//! Gmail API response normalization
//!
//! Converts Gmail API payloads into the backend-agnostic thread models.

use base64::prelude::*;

use super::api::{GmailMessage, GmailThread, MessagePart, MessagePayload};
use crate::error::GmailError;
use crate::models::{Attachment, MessageId, ThreadId, ThreadMessage, ThreadResponse};
use crate::sanitize::decode_entities;

/// Normalize a Gmail API message
pub fn normalize_message(gmail_msg: GmailMessage) -> Result<ThreadMessage, GmailError> {
    let payload = gmail_msg
        .payload
        .as_ref()
        .ok_or_else(|| GmailError::Parse(format!("message {} has no payload", gmail_msg.id)))?;

    let header = |name: &str| extract_header(payload, name).unwrap_or_default();

    // Parse internal date (milliseconds since epoch)
    let internal_date: i64 = gmail_msg.internal_date.trim().parse().unwrap_or(0);

    let mut attachments = Vec::new();
    if let Some(parts) = &payload.parts {
        collect_attachments(parts, &mut attachments);
    }

    Ok(ThreadMessage::builder(
        MessageId::new(&gmail_msg.id),
        ThreadId::new(&gmail_msg.thread_id),
    )
    .from(header("From"))
    .to(header("To"))
    .cc(header("Cc"))
    .date(header("Date"))
    .subject(header("Subject"))
    .message_id_header(extract_header(payload, "Message-ID"))
    .references(extract_header(payload, "References"))
    .body_plain(extract_body(payload, "text/plain"))
    .body_html(extract_body(payload, "text/html"))
    .snippet(decode_entities(&gmail_msg.snippet))
    .label_ids(gmail_msg.label_ids.unwrap_or_default())
    .internal_date(internal_date)
    .attachments(attachments)
    .build())
}

/// Normalize a Gmail API thread, keeping provider message order
///
/// Messages that fail to normalize are dropped with a warning.
pub fn normalize_thread(thread: GmailThread) -> ThreadResponse {
    let messages = thread
        .messages
        .unwrap_or_default()
        .into_iter()
        .filter_map(|m| {
            let id = m.id.clone();
            normalize_message(m)
                .inspect_err(|e| log::warn!("Dropping message {} from thread: {}", id, e))
                .ok()
        })
        .collect();

    ThreadResponse {
        id: ThreadId::new(thread.id),
        history_id: thread.history_id,
        messages,
    }
}

/// Extract a header value by name
fn extract_header(payload: &MessagePayload, name: &str) -> Option<String> {
    payload.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

fn is_mime(mime_type: Option<&String>, wanted: &str) -> bool {
    mime_type.is_some_and(|m| m.to_ascii_lowercase().starts_with(wanted))
}

/// Extract the first body of the given MIME type from the payload or its parts
fn extract_body(payload: &MessagePayload, mime: &str) -> Option<String> {
    // Check if this is a simple message with body data
    if let Some(body) = &payload.body
        && let Some(data) = &body.data
        && is_mime(payload.mime_type.as_ref(), mime)
    {
        return decode_base64_body(data);
    }

    payload
        .parts
        .as_deref()
        .and_then(|parts| find_body_in_parts(parts, mime))
}

/// Recursively search message parts for inline content of one MIME type
fn find_body_in_parts(parts: &[MessagePart], mime: &str) -> Option<String> {
    for part in parts {
        let is_attachment = part.filename.as_deref().is_some_and(|f| !f.is_empty());
        if !is_attachment
            && is_mime(part.mime_type.as_ref(), mime)
            && let Some(body) = &part.body
            && let Some(data) = &body.data
            && let Some(text) = decode_base64_body(data)
        {
            return Some(text);
        }

        // Recursively check nested parts
        if let Some(nested) = &part.parts
            && let Some(text) = find_body_in_parts(nested, mime)
        {
            return Some(text);
        }
    }

    None
}

/// Walk the part tree collecting every part with a filename and attachment id
fn collect_attachments(parts: &[MessagePart], out: &mut Vec<Attachment>) {
    for part in parts {
        if let Some(filename) = part.filename.as_deref().filter(|f| !f.is_empty())
            && let Some(body) = &part.body
            && let Some(attachment_id) = &body.attachment_id
        {
            out.push(Attachment {
                filename: filename.to_string(),
                mime_type: part
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                attachment_id: attachment_id.clone(),
                size: body.size.unwrap_or(0),
            });
        }
        if let Some(nested) = &part.parts {
            collect_attachments(nested, out);
        }
    }
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
pub(crate) fn decode_base64_body(data: &str) -> Option<String> {
    decode_base64_bytes(data).and_then(|bytes| String::from_utf8(bytes).ok())
}

pub(crate) fn decode_base64_bytes(data: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    decoders.iter().find_map(|decoder| decoder.decode(data.trim()).ok())
}
