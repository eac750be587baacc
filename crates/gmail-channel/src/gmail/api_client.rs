//! Gmail REST API backend
//!
//! Uses synchronous HTTP (ureq) on the blocking pool so the client stays
//! executor-agnostic; every trait method hops onto `spawn_blocking`.

use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::GmailAuth;
use super::api::{
    AttachmentResponse, BatchModifyRequest, CreateLabelRequest, GmailLabel, GmailMessage,
    GmailThread, ListLabelsResponse, ListMessagesResponse, ListSendAsResponse,
    ListThreadsResponse, ModifyRequest, SendMessageRequest, SendMessageResponse,
};
use super::client::{GmailClient, LabelDelta, SendRequest, SentMessage};
use super::mime::{MimeMessage, reply_all_recipients, reply_references, reply_subject};
use super::normalize::{decode_base64_bytes, normalize_message, normalize_thread};
use crate::config::GmailCredentials;
use crate::error::GmailError;
use crate::models::{
    Label, MessageId, SendAs, ThreadId, ThreadMessage, ThreadResponse, ThreadSummary,
};

/// Map a ureq failure onto the shared taxonomy
pub(super) fn map_ureq_error(error: ureq::Error) -> GmailError {
    match error {
        ureq::Error::StatusCode(404) => GmailError::NotFound("HTTP 404".to_string()),
        ureq::Error::StatusCode(code @ (401 | 403 | 429)) => {
            GmailError::AuthOrRateLimit(format!("HTTP {}", code))
        }
        ureq::Error::StatusCode(code) if code >= 500 => GmailError::Server(format!("HTTP {}", code)),
        ureq::Error::StatusCode(code) => GmailError::InvalidRequest(format!("HTTP {}", code)),
        ureq::Error::Timeout(_) => GmailError::Timeout(ApiGmailClient::TIMEOUT.as_secs()),
        ureq::Error::Io(e) => GmailError::Transient(e.to_string()),
        other => GmailError::Transient(other.to_string()),
    }
}

struct Inner {
    account: String,
    auth: GmailAuth,
    agent: ureq::Agent,
}

impl Inner {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    fn url(&self, path: &str) -> String {
        format!("{}/users/me/{}", Self::BASE_URL, path)
    }

    fn bearer(&self) -> Result<String, GmailError> {
        Ok(format!("Bearer {}", self.auth.get_access_token(&self.agent)?))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GmailError> {
        let mut response = self
            .agent
            .get(&self.url(path))
            .header("Authorization", &self.bearer()?)
            .call()
            .map_err(|e| self.map_error(e))?;
        response
            .body_mut()
            .read_json()
            .map_err(|e| GmailError::Parse(format!("{}: {}", path, e)))
    }

    fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GmailError> {
        let mut response = self
            .agent
            .post(&self.url(path))
            .header("Authorization", &self.bearer()?)
            .send_json(body)
            .map_err(|e| self.map_error(e))?;
        response
            .body_mut()
            .read_json()
            .map_err(|e| GmailError::Parse(format!("{}: {}", path, e)))
    }

    /// POST whose response body is irrelevant (batchModify answers with nothing)
    fn post_empty<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<(), GmailError> {
        self.agent
            .post(&self.url(path))
            .header("Authorization", &self.bearer()?)
            .send_json(body)
            .map_err(|e| self.map_error(e))?;
        Ok(())
    }

    fn map_error(&self, error: ureq::Error) -> GmailError {
        if matches!(error, ureq::Error::StatusCode(401)) {
            self.auth.invalidate();
        }
        map_ureq_error(error)
    }

    fn get_message(&self, id: &str) -> Result<ThreadMessage, GmailError> {
        let raw: GmailMessage =
            self.get_json(&format!("messages/{}?format=full", urlencoding::encode(id)))?;
        normalize_message(raw)
    }

    /// Get a message with exponential backoff retry
    fn get_message_with_retry(&self, id: &str, max_retries: u32) -> Result<ThreadMessage, GmailError> {
        let mut delay = Duration::from_millis(100);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.get_message(id) {
                Ok(msg) => return Ok(msg),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    debug!("{}: fetching message {} failed ({}), retrying", self.account, id, e);
                    // Add jitter to delay
                    let jitter = Duration::from_millis(rand_jitter());
                    std::thread::sleep(delay + jitter);
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn own_addresses(&self) -> Vec<String> {
        let mut own = vec![self.account.clone()];
        match self.get_json::<ListSendAsResponse>("settings/sendAs") {
            Ok(list) => own.extend(list.send_as.unwrap_or_default().into_iter().map(|s| s.send_as_email)),
            Err(e) => warn!("{}: could not list send-as aliases: {}", self.account, e),
        }
        own
    }

    fn send(&self, request: &SendRequest) -> Result<SentMessage, GmailError> {
        request.validate()?;

        // The message being answered: explicit id, else the thread's latest
        let original = match (&request.reply_to_message_id, &request.thread_id) {
            (Some(id), _) => Some(self.get_message(id.as_str())?),
            (None, Some(thread_id)) => {
                let thread: GmailThread = self.get_json(&format!(
                    "threads/{}?format=full",
                    urlencoding::encode(thread_id.as_str())
                ))?;
                normalize_thread(thread).messages.pop()
            }
            (None, None) => None,
        };

        let mut mime = MimeMessage {
            from: self.account.clone(),
            to: request.to.clone(),
            subject: request.subject.clone().unwrap_or_default(),
            body_plain: request.body_plain.clone(),
            body_html: request.body_html.clone(),
            ..Default::default()
        };

        if let Some(original) = &original {
            if request.reply_all {
                let (to, cc) = reply_all_recipients(original, &self.own_addresses());
                mime.to.extend(to);
                mime.cc = cc;
            } else if mime.to.is_empty() {
                mime.to.push(original.from.clone());
            }
            if request.subject.is_none() {
                mime.subject = reply_subject(&original.subject);
            }
            mime.in_reply_to = original.message_id_header.clone();
            mime.references = reply_references(original);
        }

        if mime.to.is_empty() && mime.cc.is_empty() {
            return Err(GmailError::InvalidRequest("reply has no recipients".to_string()));
        }

        let thread_id = request
            .thread_id
            .as_ref()
            .map(|t| t.as_str().to_string())
            .or_else(|| original.as_ref().map(|o| o.thread_id.as_str().to_string()));

        let sent: SendMessageResponse = self.post_json(
            "messages/send",
            &SendMessageRequest {
                raw: mime.to_raw(),
                thread_id,
            },
        )?;

        Ok(SentMessage {
            id: MessageId::new(sent.id),
            thread_id: ThreadId::new(sent.thread_id),
        })
    }

    fn download_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
        dest: &Path,
    ) -> Result<(), GmailError> {
        let response: AttachmentResponse = self.get_json(&format!(
            "messages/{}/attachments/{}",
            urlencoding::encode(message_id),
            urlencoding::encode(attachment_id)
        ))?;
        let data = response
            .data
            .ok_or_else(|| GmailError::Parse(format!("attachment {} has no data", attachment_id)))?;
        let bytes = decode_base64_bytes(&data)
            .ok_or_else(|| GmailError::Parse(format!("attachment {} is not base64", attachment_id)))?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GmailError::Transient(e.to_string()))?;
        }
        std::fs::write(dest, &bytes).map_err(|e| GmailError::Transient(e.to_string()))?;
        debug!(
            "{}: wrote attachment {} ({} bytes, {} reported)",
            self.account,
            dest.display(),
            bytes.len(),
            response.size.unwrap_or(0)
        );
        Ok(())
    }
}

/// Gmail client that calls the REST API directly
#[derive(Clone)]
pub struct ApiGmailClient {
    inner: Arc<Inner>,
}

impl ApiGmailClient {
    /// Global per-request timeout
    pub const TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a client for one account
    ///
    /// # Arguments
    /// * `account` - The mailbox address, used for reply-all and logging
    /// * `credentials` - OAuth client id, secret and refresh token
    pub fn new(account: impl Into<String>, credentials: GmailCredentials) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Self::TIMEOUT))
            .build()
            .into();
        Self {
            inner: Arc::new(Inner {
                account: account.into(),
                auth: GmailAuth::new(credentials),
                agent,
            }),
        }
    }

    /// Run blocking HTTP work on the blocking pool
    async fn blocking<T, F>(&self, f: F) -> Result<T, GmailError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, GmailError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| GmailError::Transient(format!("blocking task failed: {}", e)))?
    }

    /// Turn not-found into `T::default()`
    fn or_empty<T: Default>(result: Result<T, GmailError>) -> Result<T, GmailError> {
        match result {
            Err(e) if e.is_not_found() => Ok(T::default()),
            other => other,
        }
    }
}

#[async_trait]
impl GmailClient for ApiGmailClient {
    async fn probe(&self) -> Result<(), GmailError> {
        self.blocking(|inner| {
            inner.bearer().map(|_| ()).map_err(|e| match e {
                GmailError::AuthOrRateLimit(msg) => GmailError::ConfigurationMissing(format!(
                    "Gmail credentials rejected: {}",
                    msg
                )),
                other => other,
            })
        })
        .await
    }

    async fn send(&self, request: &SendRequest) -> Result<SentMessage, GmailError> {
        let request = request.clone();
        self.blocking(move |inner| inner.send(&request)).await
    }

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<ThreadResponse>, GmailError> {
        let path = format!("threads/{}?format=full", urlencoding::encode(id.as_str()));
        Self::or_empty(
            self.blocking(move |inner| {
                let thread: GmailThread = inner.get_json(&path)?;
                Ok(Some(normalize_thread(thread)))
            })
            .await,
        )
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<ThreadMessage>, GmailError> {
        let id = id.as_str().to_string();
        Self::or_empty(self.blocking(move |inner| inner.get_message(&id).map(Some)).await)
    }

    async fn search_messages(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<ThreadMessage>, GmailError> {
        let path = format!(
            "messages?q={}&maxResults={}",
            urlencoding::encode(query),
            max_results.clamp(1, 500)
        );
        Self::or_empty(
            self.blocking(move |inner| {
                let list: ListMessagesResponse = inner.get_json(&path)?;
                let mut messages = Vec::new();
                for msg_ref in list.messages.unwrap_or_default() {
                    match inner.get_message_with_retry(&msg_ref.id, 3) {
                        Ok(message) => messages.push(message),
                        // Gone between list and fetch
                        Err(e) if e.is_not_found() => {}
                        Err(GmailError::Parse(e)) => {
                            warn!("{}: dropping unparseable message {}: {}", inner.account, msg_ref.id, e)
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(messages)
            })
            .await,
        )
    }

    async fn search_threads(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<ThreadSummary>, GmailError> {
        let path = format!(
            "threads?q={}&maxResults={}",
            urlencoding::encode(query),
            max_results.clamp(1, 500)
        );
        Self::or_empty(
            self.blocking(move |inner| {
                let list: ListThreadsResponse = inner.get_json(&path)?;
                Ok(list
                    .threads
                    .unwrap_or_default()
                    .into_iter()
                    .map(|t| ThreadSummary {
                        id: ThreadId::new(t.id),
                        snippet: t.snippet,
                        history_id: t.history_id,
                    })
                    .collect())
            })
            .await,
        )
    }

    async fn modify_labels(&self, ids: &[MessageId], delta: &LabelDelta) -> Result<(), GmailError> {
        if ids.is_empty() || delta.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
        let delta = delta.clone();
        self.blocking(move |inner| {
            inner.post_empty(
                "messages/batchModify",
                &BatchModifyRequest {
                    ids: ids.iter().map(String::as_str).collect(),
                    add_label_ids: &delta.add,
                    remove_label_ids: &delta.remove,
                },
            )
        })
        .await
    }

    async fn modify_thread_labels(
        &self,
        id: &ThreadId,
        delta: &LabelDelta,
    ) -> Result<(), GmailError> {
        if delta.is_empty() {
            return Ok(());
        }
        let path = format!("threads/{}/modify", urlencoding::encode(id.as_str()));
        let delta = delta.clone();
        self.blocking(move |inner| {
            inner.post_empty(
                &path,
                &ModifyRequest {
                    add_label_ids: &delta.add,
                    remove_label_ids: &delta.remove,
                },
            )
        })
        .await
    }

    async fn list_labels(&self) -> Result<Vec<Label>, GmailError> {
        Self::or_empty(
            self.blocking(|inner| {
                let list: ListLabelsResponse = inner.get_json("labels")?;
                Ok(list.labels.unwrap_or_default().into_iter().map(to_label).collect())
            })
            .await,
        )
    }

    async fn create_label(&self, name: &str) -> Result<Label, GmailError> {
        let name = name.to_string();
        self.blocking(move |inner| {
            let created: GmailLabel = inner.post_json(
                "labels",
                &CreateLabelRequest {
                    name: &name,
                    label_list_visibility: "labelShow",
                    message_list_visibility: "show",
                },
            )?;
            Ok(to_label(created))
        })
        .await
    }

    async fn download_attachment(
        &self,
        message_id: &MessageId,
        attachment_id: &str,
        dest: &Path,
    ) -> Result<(), GmailError> {
        let message_id = message_id.as_str().to_string();
        let attachment_id = attachment_id.to_string();
        let dest: PathBuf = dest.to_path_buf();
        self.blocking(move |inner| inner.download_attachment(&message_id, &attachment_id, &dest))
            .await
    }

    async fn get_send_as(&self) -> Result<Vec<SendAs>, GmailError> {
        Self::or_empty(
            self.blocking(|inner| {
                let list: ListSendAsResponse = inner.get_json("settings/sendAs")?;
                Ok(list
                    .send_as
                    .unwrap_or_default()
                    .into_iter()
                    .map(|s| SendAs {
                        send_as_email: s.send_as_email,
                        display_name: s.display_name,
                        is_default: s.is_default,
                        is_primary: s.is_primary,
                    })
                    .collect())
            })
            .await,
        )
    }
}

fn to_label(label: GmailLabel) -> Label {
    if label.label_type.as_deref() == Some("system") {
        Label::system(label.id, label.name)
    } else {
        Label::new(label.id, label.name)
    }
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_map_to_taxonomy() {
        assert!(map_ureq_error(ureq::Error::StatusCode(404)).is_not_found());
        for code in [401, 403, 429] {
            assert!(matches!(
                map_ureq_error(ureq::Error::StatusCode(code)),
                GmailError::AuthOrRateLimit(_)
            ));
        }
        assert!(matches!(map_ureq_error(ureq::Error::StatusCode(503)), GmailError::Server(_)));
        assert!(matches!(
            map_ureq_error(ureq::Error::StatusCode(400)),
            GmailError::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_system_labels_flagged() {
        let label = to_label(GmailLabel {
            id: "INBOX".into(),
            name: "INBOX".into(),
            label_type: Some("system".into()),
        });
        assert!(label.is_system);
        let label = to_label(GmailLabel {
            id: "Label_7".into(),
            name: "not-allow-listed".into(),
            label_type: Some("user".into()),
        });
        assert!(!label.is_system);
    }

    #[tokio::test]
    async fn test_invalid_send_is_rejected_before_any_request() {
        let client = ApiGmailClient::new(
            "bot@example.com",
            GmailCredentials {
                client_id: "id".into(),
                client_secret: "secret".into(),
                refresh_token: "refresh".into(),
            },
        );
        let result = client.send(&SendRequest::default()).await;
        assert!(matches!(result, Err(GmailError::InvalidRequest(_))));
    }
}
