//! One sync pass over an account's unread inbox
//!
//! A pass searches unread inbox mail, quarantines senders outside the
//! allow-list, then walks each thread oldest-first handing messages to the
//! [`InboundHandler`]. Within a thread a failed dispatch stops the walk so
//! ordering is preserved on the retry.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::dedup::DedupSet;
use super::handler::InboundHandler;
use super::limiter::DispatchLimiter;
use super::timing::cooldown_elapsed;
use crate::error::GmailError;
use crate::gmail::{GmailClient, LabelDelta};
use crate::models::{Account, InboundMessage, MessageId, Sender, ThreadId, ThreadMessage};
use crate::policy::is_sender_allowed;
use crate::sanitize::sanitize;
use crate::session::{SessionStore, session_key};

/// Gmail query selecting the work queue
pub const INBOX_QUERY: &str = "in:inbox is:unread";

/// Messages fetched per pass
pub const PAGE_SIZE: usize = 50;

const HOUSEKEEPING_INTERVAL_SECS: u64 = 60 * 60;

/// Statistics from one pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassStats {
    /// Messages returned by the inbox search
    pub fetched: usize,
    /// Messages handed to the inbound handler successfully
    pub dispatched: usize,
    /// Messages moved to quarantine
    pub quarantined: usize,
    /// Messages the account sent itself
    pub skipped_own: usize,
    /// Messages already dispatched in this dedup window
    pub skipped_duplicate: usize,
    /// Dispatches the handler rejected
    pub dispatch_failures: usize,
    pub attachments_downloaded: usize,
    /// Label or download failures that did not stop the pass
    pub errors: usize,
    /// The pass stopped early on cancellation
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// Inbox sync for a single account
///
/// Owns the account's dedup set, so one instance must serve every pass of
/// that account.
pub struct InboxSync {
    client: Arc<dyn GmailClient>,
    handler: Arc<dyn InboundHandler>,
    limiter: DispatchLimiter,
    sessions: Option<Arc<dyn SessionStore>>,
    attachments_root: Option<PathBuf>,
    dedup: Mutex<DedupSet>,
    last_housekeeping: Mutex<Option<DateTime<Utc>>>,
}

impl InboxSync {
    /// Create a sync engine
    ///
    /// # Arguments
    /// * `client` - The account's Gmail client
    /// * `handler` - Receives dispatched messages
    /// * `limiter` - Dispatch slots, usually shared across accounts
    pub fn new(
        client: Arc<dyn GmailClient>,
        handler: Arc<dyn InboundHandler>,
        limiter: DispatchLimiter,
    ) -> Self {
        Self {
            client,
            handler,
            limiter,
            sessions: None,
            attachments_root: None,
            dedup: Mutex::new(DedupSet::default()),
            last_housekeeping: Mutex::new(None),
        }
    }

    /// Record session activity and prune idle sessions through `store`
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    /// Download attachments below `root`; without a root nothing is downloaded
    pub fn with_attachments_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.attachments_root = Some(root.into());
        self
    }

    pub fn with_dedup_window(self, window: Duration) -> Self {
        *self.dedup() = DedupSet::new(window);
        self
    }

    pub fn client(&self) -> &Arc<dyn GmailClient> {
        &self.client
    }

    /// Whether `id` was dispatched in the current dedup window
    pub fn is_dispatched(&self, id: &MessageId) -> bool {
        self.dedup().contains(id)
    }

    /// Run one pass
    ///
    /// Only the inbox search can fail the pass. Quarantine, mark-read and
    /// download failures are counted in [`PassStats::errors`] and logged.
    pub async fn run_pass(
        &self,
        account: &Account,
        cancel: &CancellationToken,
    ) -> Result<PassStats, GmailError> {
        let start = Instant::now();
        let mut stats = PassStats::default();

        if self.dedup().clear_if_expired(Instant::now()) {
            debug!("{}: dedup window rolled over", account.email);
        }

        let messages = self.client.search_messages(INBOX_QUERY, PAGE_SIZE).await?;
        stats.fetched = messages.len();

        // Threadless messages get a group of their own
        let mut threads: HashMap<String, Vec<ThreadMessage>> = HashMap::new();
        for message in messages {
            let sender = message.sender();
            if account.is_self(&sender.email) {
                stats.skipped_own += 1;
                continue;
            }
            if !is_sender_allowed(&sender.email, &account.allow_from) {
                self.quarantine(account, &message, &mut stats).await;
                continue;
            }
            let key = if message.thread_id.is_empty() {
                format!("message:{}", message.id)
            } else {
                message.thread_id.as_str().to_string()
            };
            threads.entry(key).or_default().push(message);
        }

        for messages in threads.into_values() {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            self.process_thread(account, messages, cancel, &mut stats).await;
        }

        self.housekeeping(account).await;

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "{}: pass done in {}ms: fetched {}, dispatched {}, quarantined {}, skipped {}, errors {}",
            account.email,
            stats.duration_ms,
            stats.fetched,
            stats.dispatched,
            stats.quarantined,
            stats.skipped_own + stats.skipped_duplicate,
            stats.errors + stats.dispatch_failures
        );
        Ok(stats)
    }

    async fn quarantine(&self, account: &Account, message: &ThreadMessage, stats: &mut PassStats) {
        let ids = std::slice::from_ref(&message.id);
        match self.client.modify_labels(ids, &LabelDelta::quarantine()).await {
            Ok(()) => {
                stats.quarantined += 1;
                info!(
                    "{}: quarantined {} from {}",
                    account.email,
                    message.id,
                    message.sender().normalized()
                );
            }
            Err(e) => {
                stats.errors += 1;
                warn!("{}: failed to quarantine {}: {}", account.email, message.id, e);
            }
        }
    }

    async fn process_thread(
        &self,
        account: &Account,
        mut messages: Vec<ThreadMessage>,
        cancel: &CancellationToken,
        stats: &mut PassStats,
    ) {
        let before = messages.len();
        {
            let dedup = self.dedup();
            messages.retain(|m| !dedup.contains(&m.id));
        }
        stats.skipped_duplicate += before - messages.len();
        if messages.is_empty() {
            return;
        }
        messages.sort_by_key(ThreadMessage::timestamp_millis);

        let thread_id = messages[0].thread_id.clone();
        let mut delivered: Vec<MessageId> = Vec::new();
        let mut attachments_dir = None;

        for message in &messages {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            let claimed = self.dedup().insert(&message.id);
            if !claimed {
                stats.skipped_duplicate += 1;
                continue;
            }

            let (inbound, dir) = self.to_inbound(account, message, stats).await;
            attachments_dir = attachments_dir.or(dir);

            let outcome = self
                .limiter
                .run(self.handler.on_message(inbound))
                .await
                .unwrap_or_else(|e| Err(e.into()));

            match outcome {
                Ok(()) => {
                    stats.dispatched += 1;
                    delivered.push(message.id.clone());
                    debug!("{}: dispatched {}", account.email, message.id);
                }
                Err(e) => {
                    self.dedup().remove(&message.id);
                    stats.dispatch_failures += 1;
                    warn!(
                        "{}: dispatch of {} failed, will retry next pass: {:#}",
                        account.email, message.id, e
                    );
                    break;
                }
            }
        }

        if delivered.is_empty() {
            return;
        }
        if !thread_id.is_empty() {
            self.record_session(account, &thread_id, attachments_dir.as_deref()).await;
        }

        let whole_thread = delivered.len() == messages.len() && !thread_id.is_empty();
        let result = if whole_thread {
            self.client
                .modify_thread_labels(&thread_id, &LabelDelta::mark_read())
                .await
        } else {
            self.client.modify_labels(&delivered, &LabelDelta::mark_read()).await
        };
        if let Err(e) = result {
            stats.errors += 1;
            warn!(
                "{}: dispatched but failed to mark read ({} messages): {}",
                account.email,
                delivered.len(),
                e
            );
        }
    }

    /// Build the inbound message, downloading attachments first
    async fn to_inbound(
        &self,
        account: &Account,
        message: &ThreadMessage,
        stats: &mut PassStats,
    ) -> (InboundMessage, Option<PathBuf>) {
        let address = message.sender();
        let mut text = message_text(message);

        let (attachments, dir) = self.download_attachments(account, message, stats).await;
        if !attachments.is_empty() {
            let lines: Vec<String> = attachments
                .iter()
                .map(|p| format!("[Attachment: {}]", p.display()))
                .collect();
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&lines.join("\n"));
        }

        let inbound = InboundMessage {
            id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            text,
            subject: message.subject.clone(),
            sender: Sender {
                id: address.normalized(),
                name: address.name.clone(),
            },
            timestamp: message.received_at(),
            attachments,
            raw: serde_json::to_value(message).unwrap_or(serde_json::Value::Null),
        };
        (inbound, dir)
    }

    async fn download_attachments(
        &self,
        account: &Account,
        message: &ThreadMessage,
        stats: &mut PassStats,
    ) -> (Vec<PathBuf>, Option<PathBuf>) {
        if !account.download_attachments || message.attachments.is_empty() {
            return (Vec::new(), None);
        }
        let Some(root) = &self.attachments_root else {
            return (Vec::new(), None);
        };

        let group = if message.thread_id.is_empty() {
            message.id.as_str()
        } else {
            message.thread_id.as_str()
        };
        let dir = attachment_dir(root, &account.email, group);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            stats.errors += 1;
            warn!("{}: cannot create {}: {}", account.email, dir.display(), e);
            return (Vec::new(), None);
        }

        let mut paths = Vec::new();
        for (index, attachment) in message.attachments.iter().enumerate() {
            if attachment.size > account.max_attachment_bytes {
                info!(
                    "{}: skipping attachment {} on {} ({} bytes over limit)",
                    account.email, attachment.filename, message.id, attachment.size
                );
                continue;
            }
            let mut name = sanitize_path_component(&attachment.filename);
            if name == "_" {
                name = format!("attachment-{}", index + 1);
            }
            let dest = dir.join(name);
            match self
                .client
                .download_attachment(&message.id, &attachment.attachment_id, &dest)
                .await
            {
                Ok(()) => {
                    stats.attachments_downloaded += 1;
                    paths.push(dest);
                }
                Err(e) => {
                    stats.errors += 1;
                    warn!(
                        "{}: failed to download {} from {}: {}",
                        account.email, attachment.filename, message.id, e
                    );
                }
            }
        }
        (paths, Some(dir))
    }

    async fn record_session(&self, account: &Account, thread_id: &ThreadId, dir: Option<&Path>) {
        let Some(sessions) = &self.sessions else {
            return;
        };
        let key = session_key(&account.email, thread_id);
        if let Err(e) = sessions.record_activity(&key, dir).await {
            warn!("{}: failed to record session {}: {:#}", account.email, key, e);
        }
    }

    async fn housekeeping(&self, account: &Account) {
        let Some(sessions) = &self.sessions else {
            return;
        };
        {
            let mut last = self.last_housekeeping.lock().unwrap_or_else(|p| p.into_inner());
            if !cooldown_elapsed(*last, HOUSEKEEPING_INTERVAL_SECS) {
                return;
            }
            *last = Some(Utc::now());
        }
        match sessions.prune_expired(&account.email, account.session_ttl()).await {
            Ok(stats) if stats.removed > 0 => info!(
                "{}: pruned {} idle sessions ({} attachment dirs)",
                account.email, stats.removed, stats.dirs_deleted
            ),
            Ok(stats) => debug!("{}: {} sessions live", account.email, stats.kept),
            Err(e) => warn!("{}: session housekeeping failed: {:#}", account.email, e),
        }
    }

    fn dedup(&self) -> MutexGuard<'_, DedupSet> {
        self.dedup.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Sanitized text of a message: plain body, else HTML body, else snippet
pub fn message_text(message: &ThreadMessage) -> String {
    let source = non_blank(&message.body_plain)
        .or_else(|| non_blank(&message.body_html))
        .unwrap_or(&message.snippet);
    sanitize(source)
}

fn non_blank(body: &Option<String>) -> Option<&str> {
    body.as_deref().filter(|b| !b.trim().is_empty())
}

/// `<root>/<account>/<thread>` with both components made path-safe
pub fn attachment_dir(root: &Path, account: &str, thread: &str) -> PathBuf {
    root.join(sanitize_path_component(&account.to_lowercase()))
        .join(sanitize_path_component(thread))
}

/// Reduce a name to a single safe path component
///
/// Separators and unusual characters become `_`; leading dots are dropped so
/// the result can never be `.`, `..` or hidden. Empty input yields `_`.
pub fn sanitize_path_component(name: &str) -> String {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | '@' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = replaced.trim_start_matches('.');
    let limited: String = trimmed.chars().take(200).collect();
    if limited.is_empty() {
        "_".to_string()
    } else {
        limited
    }
}
