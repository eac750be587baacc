//! Integration tests for the Gmail channel
//!
//! These drive the sync engine and outbound sender end to end against an
//! in-memory mailbox that applies label changes the way Gmail does.

use async_trait::async_trait;
use gmail_channel::gmail::{GmailClient, LabelDelta, SendRequest, SentMessage};
use gmail_channel::models::{
    Account, Attachment, ChannelDefaults, InboundMessage, Label, LabelId, MessageId, SendAs, ThreadId,
    ThreadMessage, ThreadReplyPolicy, ThreadResponse, ThreadSummary,
};
use gmail_channel::outbound::{OutboundSender, ReplyRequest, SendError};
use gmail_channel::policy::PolicyError;
use gmail_channel::session::FileSessionStore;
use gmail_channel::sync::{
    AccountStatus, DispatchLimiter, InboundHandler, InboxSync, Monitor, StatusSink,
};
use gmail_channel::GmailError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const BOT: &str = "bot@example.com";

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct Mailbox {
    messages: Vec<ThreadMessage>,
    labels: Vec<Label>,
    message_deltas: Vec<(Vec<MessageId>, LabelDelta)>,
    thread_deltas: Vec<(ThreadId, LabelDelta)>,
    sent: Vec<SendRequest>,
}

/// In-memory Gmail account
#[derive(Default)]
struct FakeGmail {
    mailbox: Mutex<Mailbox>,
    fail_label_writes: bool,
    probe_error: Option<GmailError>,
    /// Probes that fail with a transient error before the backend answers
    transient_probe_failures: Mutex<u32>,
}

impl FakeGmail {
    fn with_messages(messages: Vec<ThreadMessage>) -> Self {
        let fake = Self::default();
        fake.mailbox.lock().unwrap().messages = messages;
        fake
    }

    fn mailbox(&self) -> std::sync::MutexGuard<'_, Mailbox> {
        self.mailbox.lock().unwrap()
    }

    fn apply(message: &mut ThreadMessage, delta: &LabelDelta) {
        message.label_ids.retain(|l| !delta.remove.contains(l));
        for label in &delta.add {
            if !message.label_ids.contains(label) {
                message.label_ids.push(label.clone());
            }
        }
    }
}

#[async_trait]
impl GmailClient for FakeGmail {
    async fn probe(&self) -> Result<(), GmailError> {
        {
            let mut left = self.transient_probe_failures.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(GmailError::Transient("connection reset by peer".into()));
            }
        }
        match &self.probe_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn send(&self, request: &SendRequest) -> Result<SentMessage, GmailError> {
        request.validate()?;
        let mut mailbox = self.mailbox();
        mailbox.sent.push(request.clone());
        Ok(SentMessage {
            id: MessageId::new(format!("sent-{}", mailbox.sent.len())),
            thread_id: request.thread_id.clone().unwrap_or_else(|| ThreadId::new("new-thread")),
        })
    }

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<ThreadResponse>, GmailError> {
        let mut messages: Vec<ThreadMessage> = self
            .mailbox()
            .messages
            .iter()
            .filter(|m| &m.thread_id == id)
            .cloned()
            .collect();
        if messages.is_empty() {
            return Ok(None);
        }
        messages.sort_by_key(|m| m.internal_date);
        Ok(Some(ThreadResponse {
            id: id.clone(),
            history_id: None,
            messages,
        }))
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<ThreadMessage>, GmailError> {
        Ok(self.mailbox().messages.iter().find(|m| &m.id == id).cloned())
    }

    async fn search_messages(&self, _query: &str, max_results: usize) -> Result<Vec<ThreadMessage>, GmailError> {
        Ok(self
            .mailbox()
            .messages
            .iter()
            .filter(|m| m.has_label(LabelId::INBOX) && m.has_label(LabelId::UNREAD))
            .take(max_results)
            .cloned()
            .collect())
    }

    async fn search_threads(&self, _query: &str, _max_results: usize) -> Result<Vec<ThreadSummary>, GmailError> {
        Ok(Vec::new())
    }

    async fn modify_labels(&self, ids: &[MessageId], delta: &LabelDelta) -> Result<(), GmailError> {
        if self.fail_label_writes {
            return Err(GmailError::Server("backend error".into()));
        }
        let mut mailbox = self.mailbox();
        for message in mailbox.messages.iter_mut().filter(|m| ids.contains(&m.id)) {
            Self::apply(message, delta);
        }
        mailbox.message_deltas.push((ids.to_vec(), delta.clone()));
        Ok(())
    }

    async fn modify_thread_labels(&self, id: &ThreadId, delta: &LabelDelta) -> Result<(), GmailError> {
        if self.fail_label_writes {
            return Err(GmailError::Server("backend error".into()));
        }
        let mut mailbox = self.mailbox();
        for message in mailbox.messages.iter_mut().filter(|m| &m.thread_id == id) {
            Self::apply(message, delta);
        }
        mailbox.thread_deltas.push((id.clone(), delta.clone()));
        Ok(())
    }

    async fn list_labels(&self) -> Result<Vec<Label>, GmailError> {
        Ok(self.mailbox().labels.clone())
    }

    async fn create_label(&self, name: &str) -> Result<Label, GmailError> {
        let label = Label::new(format!("Label_{}", name), name);
        self.mailbox().labels.push(label.clone());
        Ok(label)
    }

    async fn download_attachment(
        &self,
        _message_id: &MessageId,
        _attachment_id: &str,
        dest: &Path,
    ) -> Result<(), GmailError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GmailError::Transient(e.to_string()))?;
        }
        std::fs::write(dest, b"attachment bytes").map_err(|e| GmailError::Transient(e.to_string()))
    }

    async fn get_send_as(&self) -> Result<Vec<SendAs>, GmailError> {
        Ok(Vec::new())
    }
}

/// Records dispatched messages; ids in `fail_once` fail their first attempt
#[derive(Default)]
struct RecordingHandler {
    received: Mutex<Vec<InboundMessage>>,
    attempts: Mutex<Vec<MessageId>>,
    fail_once: Mutex<HashSet<MessageId>>,
}

impl RecordingHandler {
    fn failing_once(ids: &[&str]) -> Self {
        let handler = Self::default();
        handler
            .fail_once
            .lock()
            .unwrap()
            .extend(ids.iter().map(|id| MessageId::new(*id)));
        handler
    }

    fn received_ids(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.id.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl InboundHandler for RecordingHandler {
    async fn on_message(&self, message: InboundMessage) -> anyhow::Result<()> {
        self.attempts.lock().unwrap().push(message.id.clone());
        if self.fail_once.lock().unwrap().remove(&message.id) {
            anyhow::bail!("agent unavailable");
        }
        self.received.lock().unwrap().push(message);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingStatus {
    updates: Mutex<Vec<AccountStatus>>,
}

impl StatusSink for RecordingStatus {
    fn set_status(&self, status: AccountStatus) {
        self.updates.lock().unwrap().push(status);
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn unread(id: &str, thread: &str, from: &str, internal_date: i64) -> ThreadMessage {
    ThreadMessage::builder(MessageId::new(id), ThreadId::new(thread))
        .from(from)
        .to(BOT)
        .subject("Status report")
        .date("Mon, 2 Mar 2026 10:00:00 +0000")
        .body_plain(Some(format!("Body of {}", id)))
        .label_ids(vec![LabelId::INBOX.to_string(), LabelId::UNREAD.to_string()])
        .internal_date(internal_date)
        .build()
}

fn trusted_account() -> Account {
    Account::new(BOT).with_allow_from(vec!["@trusted.com".into()])
}

fn engine(fake: &Arc<FakeGmail>, handler: &Arc<RecordingHandler>) -> InboxSync {
    let client: Arc<dyn GmailClient> = fake.clone();
    let handler: Arc<dyn InboundHandler> = handler.clone();
    InboxSync::new(client, handler, DispatchLimiter::default())
}

fn sender_for(fake: &Arc<FakeGmail>, account: Account) -> OutboundSender {
    let client: Arc<dyn GmailClient> = fake.clone();
    let (_tx, rx) = watch::channel(account);
    OutboundSender::new(client, rx, ChannelDefaults::default())
}

// ============================================================================
// Inbound
// ============================================================================

#[tokio::test]
async fn test_thread_dispatched_in_order_then_marked_read() {
    let fake = Arc::new(FakeGmail::with_messages(vec![
        unread("m2", "t1", "Alice <alice@trusted.com>", 2_000),
        unread("m1", "t1", "Alice <alice@trusted.com>", 1_000),
    ]));
    let handler = Arc::new(RecordingHandler::default());
    let sync = engine(&fake, &handler);
    let account = trusted_account();
    let cancel = CancellationToken::new();

    let stats = sync.run_pass(&account, &cancel).await.unwrap();
    assert_eq!(stats.fetched, 2);
    assert_eq!(stats.dispatched, 2);
    assert_eq!(handler.received_ids(), vec!["m1", "m2"]);

    {
        let mailbox = fake.mailbox();
        assert_eq!(mailbox.thread_deltas, vec![(ThreadId::new("t1"), LabelDelta::mark_read())]);
        assert!(mailbox.message_deltas.is_empty());
    }

    let second = sync.run_pass(&account, &cancel).await.unwrap();
    assert_eq!(second.dispatched, 0);
    assert_eq!(handler.received_ids().len(), 2);
}

#[tokio::test]
async fn test_inbound_message_fields() {
    let fake = Arc::new(FakeGmail::with_messages(vec![unread(
        "m1",
        "t1",
        "\"Alice Smith\" <Alice@Trusted.com>",
        1_700_000_000_000,
    )]));
    let handler = Arc::new(RecordingHandler::default());
    engine(&fake, &handler)
        .run_pass(&trusted_account(), &CancellationToken::new())
        .await
        .unwrap();

    let received = handler.received.lock().unwrap();
    let inbound = &received[0];
    assert_eq!(inbound.sender.id, "alice@trusted.com");
    assert_eq!(inbound.sender.name.as_deref(), Some("Alice Smith"));
    assert_eq!(inbound.text, "Body of m1");
    assert_eq!(inbound.subject, "Status report");
    assert_eq!(inbound.timestamp.timestamp_millis(), 1_700_000_000_000);
    assert_eq!(inbound.raw["id"], "m1");
}

#[tokio::test]
async fn test_thread_without_internal_dates_dispatched_by_date_header() {
    let dated = |id: &str, date: &str| {
        let mut message = unread(id, "t1", "Alice <alice@trusted.com>", 0);
        message.date = date.to_string();
        message
    };
    let fake = Arc::new(FakeGmail::with_messages(vec![
        dated("m2", "Mon, 2 Mar 2026 11:00:00 +0000"),
        dated("m1", "Mon, 2 Mar 2026 10:00:00 +0000"),
    ]));
    let handler = Arc::new(RecordingHandler::default());

    engine(&fake, &handler)
        .run_pass(&trusted_account(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(handler.received_ids(), vec!["m1", "m2"]);
    let received = handler.received.lock().unwrap();
    assert_eq!(received[0].timestamp.to_rfc3339(), "2026-03-02T10:00:00+00:00");
    assert_eq!(received[1].timestamp.to_rfc3339(), "2026-03-02T11:00:00+00:00");
}

#[tokio::test]
async fn test_disallowed_sender_is_quarantined() {
    let fake = Arc::new(FakeGmail::with_messages(vec![unread("m1", "t1", "mallory@evil.com", 1_000)]));
    let handler = Arc::new(RecordingHandler::default());

    let stats = engine(&fake, &handler)
        .run_pass(&trusted_account(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.quarantined, 1);
    assert_eq!(stats.dispatched, 0);
    assert!(handler.attempts.lock().unwrap().is_empty());

    let mailbox = fake.mailbox();
    let (ids, delta) = &mailbox.message_deltas[0];
    assert_eq!(ids, &vec![MessageId::new("m1")]);
    assert_eq!(delta.add, vec!["not-allow-listed"]);
    assert_eq!(delta.remove, vec!["INBOX"]);
    // Quarantine leaves UNREAD alone
    assert!(mailbox.messages[0].has_label(LabelId::UNREAD));
    assert!(!mailbox.messages[0].has_label(LabelId::INBOX));
}

#[tokio::test]
async fn test_empty_allow_list_quarantines_everyone() {
    let fake = Arc::new(FakeGmail::with_messages(vec![unread("m1", "t1", "alice@trusted.com", 1_000)]));
    let handler = Arc::new(RecordingHandler::default());

    let stats = engine(&fake, &handler)
        .run_pass(&Account::new(BOT), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.quarantined, 1);
    assert!(handler.received_ids().is_empty());
}

#[tokio::test]
async fn test_own_messages_are_skipped() {
    let fake = Arc::new(FakeGmail::with_messages(vec![unread("m1", "t1", "Bot <BOT@example.com>", 1_000)]));
    let handler = Arc::new(RecordingHandler::default());

    let stats = engine(&fake, &handler)
        .run_pass(&trusted_account(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.skipped_own, 1);
    assert_eq!(stats.quarantined, 0);
    assert!(fake.mailbox().message_deltas.is_empty());
}

#[tokio::test]
async fn test_dedup_dispatches_once_when_mark_read_fails() {
    let fake = Arc::new(FakeGmail {
        fail_label_writes: true,
        ..FakeGmail::with_messages(vec![unread("m1", "t1", "alice@trusted.com", 1_000)])
    });
    let handler = Arc::new(RecordingHandler::default());
    let sync = engine(&fake, &handler);
    let account = trusted_account();
    let cancel = CancellationToken::new();

    let first = sync.run_pass(&account, &cancel).await.unwrap();
    assert_eq!(first.dispatched, 1);
    assert_eq!(first.errors, 1);

    // Still unread, but already dispatched
    let second = sync.run_pass(&account, &cancel).await.unwrap();
    assert_eq!(second.fetched, 1);
    assert_eq!(second.dispatched, 0);
    assert_eq!(second.skipped_duplicate, 1);
    assert_eq!(handler.attempts.lock().unwrap().len(), 1);
    assert!(sync.is_dispatched(&MessageId::new("m1")));
}

#[tokio::test]
async fn test_failed_dispatch_is_retried_next_pass() {
    let fake = Arc::new(FakeGmail::with_messages(vec![
        unread("m1", "t1", "alice@trusted.com", 1_000),
        unread("m2", "t1", "alice@trusted.com", 2_000),
    ]));
    let handler = Arc::new(RecordingHandler::failing_once(&["m1"]));
    let sync = engine(&fake, &handler);
    let account = trusted_account();
    let cancel = CancellationToken::new();

    let first = sync.run_pass(&account, &cancel).await.unwrap();
    assert_eq!(first.dispatch_failures, 1);
    assert_eq!(first.dispatched, 0);
    // m2 waits behind m1 to keep thread order
    assert_eq!(handler.attempts.lock().unwrap().len(), 1);
    assert!(!sync.is_dispatched(&MessageId::new("m1")));
    assert!(fake.mailbox().thread_deltas.is_empty());

    let second = sync.run_pass(&account, &cancel).await.unwrap();
    assert_eq!(second.dispatched, 2);
    assert_eq!(handler.received_ids(), vec!["m1", "m2"]);
    assert_eq!(fake.mailbox().thread_deltas.len(), 1);
}

#[tokio::test]
async fn test_partial_thread_marks_delivered_messages_only() {
    let fake = Arc::new(FakeGmail::with_messages(vec![
        unread("m1", "t1", "alice@trusted.com", 1_000),
        unread("m2", "t1", "alice@trusted.com", 2_000),
    ]));
    let handler = Arc::new(RecordingHandler::failing_once(&["m2"]));

    engine(&fake, &handler)
        .run_pass(&trusted_account(), &CancellationToken::new())
        .await
        .unwrap();

    let mailbox = fake.mailbox();
    assert!(mailbox.thread_deltas.is_empty());
    assert_eq!(
        mailbox.message_deltas,
        vec![(vec![MessageId::new("m1")], LabelDelta::mark_read())]
    );
}

#[tokio::test]
async fn test_cancelled_pass_dispatches_nothing() {
    let fake = Arc::new(FakeGmail::with_messages(vec![unread("m1", "t1", "alice@trusted.com", 1_000)]));
    let handler = Arc::new(RecordingHandler::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let stats = engine(&fake, &handler)
        .run_pass(&trusted_account(), &cancel)
        .await
        .unwrap();
    assert!(stats.cancelled);
    assert_eq!(stats.dispatched, 0);
}

#[tokio::test]
async fn test_attachments_downloaded_and_listed() {
    let root = tempfile::tempdir().unwrap();
    let mut message = unread("m1", "t1", "alice@trusted.com", 1_000);
    message.attachments = vec![
        Attachment {
            filename: "report.pdf".into(),
            mime_type: "application/pdf".into(),
            attachment_id: "att-1".into(),
            size: 16,
        },
        Attachment {
            filename: "huge.bin".into(),
            mime_type: "application/octet-stream".into(),
            attachment_id: "att-2".into(),
            size: 10_000_000,
        },
    ];
    let fake = Arc::new(FakeGmail::with_messages(vec![message]));
    let handler = Arc::new(RecordingHandler::default());
    let mut account = trusted_account();
    account.max_attachment_bytes = 1_000_000;

    let stats = engine(&fake, &handler)
        .with_attachments_root(root.path())
        .run_pass(&account, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.attachments_downloaded, 1);

    let expected: PathBuf = root.path().join(BOT).join("t1").join("report.pdf");
    let received = handler.received.lock().unwrap();
    assert_eq!(received[0].attachments, vec![expected.clone()]);
    assert!(received[0].text.ends_with(&format!("[Attachment: {}]", expected.display())));
    assert!(expected.exists());
}

#[tokio::test]
async fn test_session_activity_recorded() {
    let state = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeGmail::with_messages(vec![unread("m1", "t1", "alice@trusted.com", 1_000)]));
    let handler = Arc::new(RecordingHandler::default());
    let store = FileSessionStore::new(state.path());
    let index = store.index_path();

    engine(&fake, &handler)
        .with_session_store(Arc::new(store))
        .run_pass(&trusted_account(), &CancellationToken::new())
        .await
        .unwrap();

    let contents = std::fs::read_to_string(index).unwrap();
    assert!(contents.contains("gmail:bot@example.com:t1"));
}

// ============================================================================
// Monitor
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_monitor_polls_until_cancelled() {
    let fake = Arc::new(FakeGmail::with_messages(vec![unread("m1", "t1", "alice@trusted.com", 1_000)]));
    let handler = Arc::new(RecordingHandler::default());
    let status = Arc::new(RecordingStatus::default());
    let mut account = trusted_account();
    account.poll_interval_secs = 1;
    let (_tx, rx) = watch::channel(account);

    let monitor = Arc::new(Monitor::new(engine(&fake, &handler), rx, status.clone()));
    let cancel = CancellationToken::new();
    let task = {
        let monitor = Arc::clone(&monitor);
        let cancel = cancel.clone();
        tokio::spawn(async move { monitor.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    cancel.cancel();
    task.await.unwrap();

    assert_eq!(handler.received_ids(), vec!["m1"]);
    assert!(fake.mailbox().labels.iter().any(|l| l.name == LabelId::QUARANTINE));

    let updates = status.updates.lock().unwrap();
    assert!(updates.first().unwrap().running);
    let last = updates.last().unwrap();
    assert!(!last.running);
    assert_eq!(last.account_id, BOT);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_keeps_running_through_transient_startup_errors() {
    let fake = Arc::new(FakeGmail::with_messages(vec![unread("m1", "t1", "alice@trusted.com", 1_000)]));
    *fake.transient_probe_failures.lock().unwrap() = 2;
    let handler = Arc::new(RecordingHandler::default());
    let status = Arc::new(RecordingStatus::default());
    let mut account = trusted_account();
    account.poll_interval_secs = 1;
    let (_tx, rx) = watch::channel(account);

    let monitor = Arc::new(Monitor::new(engine(&fake, &handler), rx, status.clone()));
    let cancel = CancellationToken::new();
    let task = {
        let monitor = Arc::clone(&monitor);
        let cancel = cancel.clone();
        tokio::spawn(async move { monitor.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(!task.is_finished());
    cancel.cancel();
    task.await.unwrap();

    assert_eq!(handler.received_ids(), vec!["m1"]);
    let updates = status.updates.lock().unwrap();
    let first = &updates[0];
    assert!(first.running);
    assert!(!first.connected);
    assert!(first.error.as_deref().unwrap().contains("connection reset"));
    assert!(updates.iter().any(|u| u.running && u.connected));
    assert!(!updates.last().unwrap().running);
}

#[tokio::test]
async fn test_monitor_reports_missing_backend() {
    let fake = Arc::new(FakeGmail {
        probe_error: Some(GmailError::ConfigurationMissing("gog not found on PATH".into())),
        ..FakeGmail::default()
    });
    let handler = Arc::new(RecordingHandler::default());
    let status = Arc::new(RecordingStatus::default());
    let (_tx, rx) = watch::channel(trusted_account());

    let monitor = Monitor::new(engine(&fake, &handler), rx, status.clone());
    monitor.run(CancellationToken::new()).await;

    let updates = status.updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert!(!updates[0].running);
    assert!(updates[0].error.as_deref().unwrap().contains("gog not found"));
}

// ============================================================================
// Outbound
// ============================================================================

#[tokio::test]
async fn test_sender_only_policy_ignores_cc() {
    let mut original = unread("m1", "t1", "Alice <a@x.com>", 1_000);
    original.cc = "b@y.com".into();
    let fake = Arc::new(FakeGmail::with_messages(vec![original]));
    let account = Account::new(BOT)
        .with_allow_outbound_to(vec!["a@x.com".into()])
        .with_thread_reply_policy(ThreadReplyPolicy::SenderOnly);

    let report = sender_for(&fake, account)
        .send_reply(&ReplyRequest::to_thread("t1", "Thanks, **on it**."))
        .await
        .unwrap();
    assert_eq!(report.message.thread_id, ThreadId::new("t1"));

    let mailbox = fake.mailbox();
    let sent = &mailbox.sent[0];
    assert!(sent.reply_all);
    assert_eq!(sent.thread_id, Some(ThreadId::new("t1")));
    let html = sent.body_html.as_deref().unwrap();
    assert!(html.contains("<strong>on it</strong>"));
    assert!(html.contains("Alice wrote:"));
    assert!(sent.body_plain.contains("> Body of m1"));
}

#[tokio::test]
async fn test_sender_only_policy_checks_own_thread_originator() {
    let mut original = unread("m1", "t1", BOT, 1_000);
    original.to = "a@x.com".into();
    let fake = Arc::new(FakeGmail::with_messages(vec![original]));
    let account = Account::new(BOT)
        .with_allow_outbound_to(vec!["a@x.com".into()])
        .with_thread_reply_policy(ThreadReplyPolicy::SenderOnly);

    let err = sender_for(&fake, account)
        .send_reply(&ReplyRequest::to_thread("t1", "following up"))
        .await
        .unwrap_err();

    match err {
        SendError::Policy(PolicyError::Blocked { recipients, .. }) => {
            assert_eq!(recipients, vec![BOT.to_string()]);
        }
        other => panic!("expected policy rejection, got {other:?}"),
    }
    assert!(fake.mailbox().sent.is_empty());
}

#[tokio::test]
async fn test_allowlist_policy_blocks_unlisted_participant() {
    let mut original = unread("m1", "t1", "a@trusted.com", 1_000);
    original.cc = "\"Eve, External\" <x@evil.com>".into();
    let fake = Arc::new(FakeGmail::with_messages(vec![original]));
    let account = Account::new(BOT)
        .with_allow_outbound_to(vec!["@trusted.com".into()])
        .with_thread_reply_policy(ThreadReplyPolicy::Allowlist);

    let err = sender_for(&fake, account)
        .send_reply(&ReplyRequest::to_thread("t1", "hello"))
        .await
        .unwrap_err();

    match err {
        SendError::Policy(PolicyError::Blocked { recipients, .. }) => {
            assert_eq!(recipients, vec!["x@evil.com".to_string()]);
        }
        other => panic!("expected policy rejection, got {other:?}"),
    }
    assert!(fake.mailbox().sent.is_empty());
}

#[tokio::test]
async fn test_archive_on_reply_removes_inbox() {
    let fake = Arc::new(FakeGmail::with_messages(vec![unread("m1", "t1", "a@x.com", 1_000)]));
    let mut account = Account::new(BOT);
    account.archive_on_reply = Some(true);
    account.include_quote = Some(false);

    let report = sender_for(&fake, account)
        .send_reply(&ReplyRequest::to_thread("t1", "done"))
        .await
        .unwrap();
    report.archive.unwrap().await.unwrap();

    let mailbox = fake.mailbox();
    assert_eq!(mailbox.thread_deltas, vec![(ThreadId::new("t1"), LabelDelta::archive())]);
    assert_eq!(mailbox.sent[0].body_plain, "done");
}

#[tokio::test]
async fn test_reply_to_message_resolves_thread_for_policy() {
    let fake = Arc::new(FakeGmail::with_messages(vec![unread("m1", "t1", "mallory@evil.com", 1_000)]));
    let account = Account::new(BOT)
        .with_allow_outbound_to(vec!["@trusted.com".into()])
        .with_thread_reply_policy(ThreadReplyPolicy::SenderOnly);

    let err = sender_for(&fake, account)
        .send_reply(&ReplyRequest::to_message(MessageId::new("m1"), "hi"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("mallory@evil.com"));
    assert!(fake.mailbox().sent.is_empty());
}
