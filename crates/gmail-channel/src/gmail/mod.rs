//! Gmail integration
//!
//! This module provides:
//! - The [`GmailClient`] capability trait shared by both backends
//! - An HTTP backend talking to the Gmail REST API ([`ApiGmailClient`])
//! - A subprocess backend driving a Gmail CLI ([`CliGmailClient`])
//! - A circuit breaker guarding the subprocess read path
//! - Response normalization to domain models

mod api_client;
mod auth;
mod circuit;
mod cli;
mod client;
pub mod mime;
mod normalize;

pub use api_client::ApiGmailClient;
pub use auth::GmailAuth;
pub use circuit::{CircuitBreaker, CircuitState, RetryPolicy};
pub use cli::CliGmailClient;
pub use client::{GmailClient, LabelDelta, SendRequest, SentMessage, ensure_label};
pub use normalize::{normalize_message, normalize_thread};

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Deserializer, Serialize};

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: String,
    }

    /// Full message from Gmail API
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        #[serde(default)]
        pub thread_id: String,
        pub label_ids: Option<Vec<String>>,
        #[serde(default)]
        pub snippet: String,
        /// Milliseconds since epoch; a string on the wire, a number from some CLIs
        #[serde(default, deserialize_with = "string_or_number")]
        pub internal_date: String,
        pub payload: Option<MessagePayload>,
    }

    /// Message payload containing headers and body
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Message body (may be base64 encoded, or a reference to an attachment)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageBody {
        pub size: Option<u64>,
        pub data: Option<String>,
        pub attachment_id: Option<String>,
    }

    /// Message part (for multipart messages)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Full thread from Gmail API
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailThread {
        pub id: String,
        pub history_id: Option<String>,
        pub messages: Option<Vec<GmailMessage>>,
    }

    /// Response from listing threads
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListThreadsResponse {
        pub threads: Option<Vec<ThreadRef>>,
        pub next_page_token: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ThreadRef {
        pub id: String,
        #[serde(default)]
        pub snippet: String,
        pub history_id: Option<String>,
    }

    /// Response from listing labels
    #[derive(Debug, Deserialize)]
    pub struct ListLabelsResponse {
        pub labels: Option<Vec<GmailLabel>>,
    }

    /// Label as returned by the labels endpoints
    #[derive(Debug, Deserialize)]
    pub struct GmailLabel {
        pub id: String,
        pub name: String,
        #[serde(rename = "type")]
        pub label_type: Option<String>,
    }

    /// Body for `labels.create`
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CreateLabelRequest<'a> {
        pub name: &'a str,
        pub label_list_visibility: &'a str,
        pub message_list_visibility: &'a str,
    }

    /// Response from `settings.sendAs.list`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListSendAsResponse {
        pub send_as: Option<Vec<GmailSendAs>>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailSendAs {
        pub send_as_email: String,
        pub display_name: Option<String>,
        #[serde(default)]
        pub is_default: bool,
        #[serde(default)]
        pub is_primary: bool,
    }

    /// Body for `messages.batchModify`
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BatchModifyRequest<'a> {
        pub ids: Vec<&'a str>,
        pub add_label_ids: &'a [String],
        pub remove_label_ids: &'a [String],
    }

    /// Body for `threads.modify`
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ModifyRequest<'a> {
        pub add_label_ids: &'a [String],
        pub remove_label_ids: &'a [String],
    }

    /// Body for `messages.send`
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SendMessageRequest {
        /// base64url-encoded RFC 5322 message
        pub raw: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub thread_id: Option<String>,
    }

    /// Response from `messages.send`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SendMessageResponse {
        pub id: String,
        #[serde(default)]
        pub thread_id: String,
    }

    /// Response from `messages.attachments.get`
    #[derive(Debug, Deserialize)]
    pub struct AttachmentResponse {
        pub size: Option<u64>,
        pub data: Option<String>,
    }

    fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }
        Ok(match Option::<Raw>::deserialize(deserializer)? {
            Some(Raw::Text(s)) => s,
            Some(Raw::Number(n)) => n.to_string(),
            None => String::new(),
        })
    }
}
