//! Gmail CLI backend
//!
//! Drives an external Gmail command-line tool that prints JSON. Every
//! invocation is `<exe> --json --account <email> gmail <subcommand...>`,
//! bounded by a hard timeout that kills the child. Reads go through the
//! circuit breaker; writes use the write retry budget.

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;

use super::api::GmailMessage;
use super::circuit::{CircuitBreaker, RetryPolicy};
use super::client::{GmailClient, LabelDelta, SendRequest, SentMessage};
use super::normalize::{normalize_message, normalize_thread};
use crate::error::GmailError;
use crate::models::{
    Attachment, Label, MessageId, SendAs, ThreadId, ThreadMessage, ThreadResponse, ThreadSummary,
    parse_date_header,
};
use crate::sanitize::decode_entities;

/// Gmail client backed by a CLI subprocess
pub struct CliGmailClient {
    executable: String,
    account: String,
    timeout: Duration,
    resolved: OnceLock<PathBuf>,
    breaker: CircuitBreaker,
}

impl CliGmailClient {
    /// Hard limit for a single invocation
    pub const TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a client for one account
    ///
    /// # Arguments
    /// * `executable` - CLI name or path, resolved through `PATH`
    /// * `account` - The mailbox address passed as `--account`
    pub fn new(executable: impl Into<String>, account: impl Into<String>) -> Self {
        Self::with_policy(executable, account, RetryPolicy::default())
    }

    pub fn with_policy(
        executable: impl Into<String>,
        account: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        let account = account.into();
        Self {
            executable: executable.into(),
            breaker: CircuitBreaker::new(account.clone(), policy),
            account,
            timeout: Self::TIMEOUT,
            resolved: OnceLock::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The breaker guarding reads, for status reporting
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn resolve(&self) -> Result<PathBuf, GmailError> {
        if let Some(path) = self.resolved.get() {
            return Ok(path.clone());
        }
        let path = which::which(&self.executable).map_err(|e| {
            GmailError::ConfigurationMissing(format!("{} not found on PATH: {}", self.executable, e))
        })?;
        let _ = self.resolved.set(path.clone());
        Ok(path)
    }

    /// Run one invocation and parse stdout as JSON
    async fn run(&self, args: &[String]) -> Result<Value, GmailError> {
        let exe = self.resolve()?;
        debug!("{}: {} gmail {}", self.account, self.executable, args.join(" "));

        let mut command = Command::new(&exe);
        command
            .arg("--json")
            .arg("--account")
            .arg(&self.account)
            .arg("gmail")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => return Err(GmailError::Timeout(self.timeout.as_secs())),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GmailError::ConfigurationMissing(format!(
                    "{}: {}",
                    exe.display(),
                    e
                )));
            }
            Ok(Err(e)) => return Err(GmailError::Transient(e.to_string())),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!("{} exited with {}", self.executable, output.status)
            } else {
                stderr.trim().to_string()
            };
            return Err(GmailError::classify(&message));
        }

        parse_stdout(&output.stdout)
    }

    async fn read<T, F>(&self, args: Vec<String>, parse: F) -> Result<T, GmailError>
    where
        T: Default,
        F: Fn(Value) -> Result<T, GmailError>,
    {
        let args = &args;
        let parse = &parse;
        self.breaker
            .read(|| async move { parse(self.run(args).await?) })
            .await
    }

    async fn write<T, F>(&self, args: Vec<String>, parse: F) -> Result<T, GmailError>
    where
        F: Fn(Value) -> Result<T, GmailError>,
    {
        let args = &args;
        let parse = &parse;
        self.breaker
            .write(|| async move { parse(self.run(args).await?) })
            .await
    }
}

#[async_trait]
impl GmailClient for CliGmailClient {
    async fn probe(&self) -> Result<(), GmailError> {
        self.resolve().map(|_| ())
    }

    async fn send(&self, request: &SendRequest) -> Result<SentMessage, GmailError> {
        request.validate()?;
        self.write(send_args(request), |value| {
            let value = unwrap_key(value, "message");
            let id = str_field(&value, &["id", "messageId"])
                .ok_or_else(|| GmailError::Parse("send output has no message id".to_string()))?;
            let thread_id = str_field(&value, &["threadId", "thread_id"])
                .or_else(|| request.thread_id.as_ref().map(|t| t.as_str().to_string()))
                .unwrap_or_default();
            Ok(SentMessage {
                id: MessageId::new(id),
                thread_id: ThreadId::new(thread_id),
            })
        })
        .await
    }

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<ThreadResponse>, GmailError> {
        let args = vec!["thread".into(), "get".into(), id.as_str().to_string(), "--full".into()];
        self.read(args, |value| parse_thread(value, id).map(Some)).await
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<ThreadMessage>, GmailError> {
        let args = vec![
            "get".into(),
            id.as_str().to_string(),
            "--format".into(),
            "full".into(),
        ];
        self.read(args, |value| parse_message(unwrap_key(value, "message")).map(Some))
            .await
    }

    async fn search_messages(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<ThreadMessage>, GmailError> {
        let args = vec![
            "messages".into(),
            "search".into(),
            query.to_string(),
            "--max".into(),
            max_results.to_string(),
            "--include-body".into(),
        ];
        let account = self.account.as_str();
        self.read(args, |value| {
            Ok(list_items(value, "messages")
                .into_iter()
                .filter_map(|item| {
                    parse_message(item)
                        .inspect_err(|e| warn!("{}: dropping unparseable message: {}", account, e))
                        .ok()
                })
                .collect())
        })
        .await
    }

    async fn search_threads(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<ThreadSummary>, GmailError> {
        let args = vec![
            "search".into(),
            query.to_string(),
            "--max".into(),
            max_results.to_string(),
        ];
        self.read(args, |value| {
            Ok(list_items(value, "threads")
                .iter()
                .filter_map(|item| {
                    let id = str_field(item, &["id", "threadId"])?;
                    Some(ThreadSummary {
                        id: ThreadId::new(id),
                        snippet: str_field(item, &["snippet"]).unwrap_or_default(),
                        history_id: str_field(item, &["historyId"]),
                    })
                })
                .collect())
        })
        .await
    }

    async fn modify_labels(&self, ids: &[MessageId], delta: &LabelDelta) -> Result<(), GmailError> {
        if ids.is_empty() || delta.is_empty() {
            return Ok(());
        }
        let mut args: Vec<String> = vec!["batch".into(), "modify".into()];
        args.extend(ids.iter().map(|id| id.as_str().to_string()));
        push_delta_args(&mut args, delta);
        self.write(args, |_| Ok(())).await
    }

    async fn modify_thread_labels(
        &self,
        id: &ThreadId,
        delta: &LabelDelta,
    ) -> Result<(), GmailError> {
        if delta.is_empty() {
            return Ok(());
        }
        let mut args: Vec<String> = vec!["thread".into(), "modify".into(), id.as_str().to_string()];
        push_delta_args(&mut args, delta);
        self.write(args, |_| Ok(())).await
    }

    async fn list_labels(&self) -> Result<Vec<Label>, GmailError> {
        let args = vec!["labels".into(), "list".into()];
        self.read(args, |value| {
            Ok(list_items(value, "labels").iter().filter_map(parse_label).collect())
        })
        .await
    }

    async fn create_label(&self, name: &str) -> Result<Label, GmailError> {
        let args = vec!["labels".into(), "create".into(), name.to_string()];
        self.write(args, |value| {
            let value = unwrap_key(value, "label");
            Ok(parse_label(&value).unwrap_or_else(|| Label::new(name, name)))
        })
        .await
    }

    async fn download_attachment(
        &self,
        message_id: &MessageId,
        attachment_id: &str,
        dest: &Path,
    ) -> Result<(), GmailError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GmailError::Transient(e.to_string()))?;
        }
        let args = vec![
            "attachment".into(),
            message_id.as_str().to_string(),
            attachment_id.to_string(),
            "--out".into(),
            dest.display().to_string(),
        ];
        self.write(args, |_| Ok(())).await
    }

    async fn get_send_as(&self) -> Result<Vec<SendAs>, GmailError> {
        let args = vec!["sendas".into(), "list".into()];
        self.read(args, |value| {
            Ok(list_items(value, "sendAs")
                .into_iter()
                .filter_map(|item| serde_json::from_value::<SendAs>(item).ok())
                .collect())
        })
        .await
    }
}

fn send_args(request: &SendRequest) -> Vec<String> {
    let mut args: Vec<String> = vec!["send".into()];
    if request.reply_all {
        args.push("--reply-all".into());
    }
    if let Some(message_id) = &request.reply_to_message_id {
        args.push("--reply-to-message-id".into());
        args.push(message_id.as_str().to_string());
    } else if let Some(thread_id) = &request.thread_id {
        args.push("--thread-id".into());
        args.push(thread_id.as_str().to_string());
    }
    if !request.to.is_empty() {
        args.push("--to".into());
        args.push(request.to.join(","));
    }
    if let Some(subject) = &request.subject {
        args.push("--subject".into());
        args.push(subject.clone());
    }
    args.push("--body".into());
    args.push(request.body_plain.clone());
    if let Some(html) = &request.body_html {
        args.push("--body-html".into());
        args.push(html.clone());
    }
    args
}

fn push_delta_args(args: &mut Vec<String>, delta: &LabelDelta) {
    if !delta.add.is_empty() {
        args.push("--add".into());
        args.push(delta.add.join(","));
    }
    if !delta.remove.is_empty() {
        args.push("--remove".into());
        args.push(delta.remove.join(","));
    }
}

fn parse_stdout(stdout: &[u8]) -> Result<Value, GmailError> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| GmailError::Parse(format!("CLI output: {}", e)))
}

/// `{"<key>": inner}` becomes `inner`; anything else passes through
fn unwrap_key(value: Value, key: &str) -> Value {
    match value {
        Value::Object(mut map) if map.get(key).is_some_and(Value::is_object) => {
            map.remove(key).unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// A bare array, or the array under `key`
fn list_items(value: Value, key: &str) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn parse_label(value: &Value) -> Option<Label> {
    let id = str_field(value, &["id"])?;
    let name = str_field(value, &["name"]).unwrap_or_else(|| id.clone());
    let system = str_field(value, &["type"]).is_some_and(|t| t.eq_ignore_ascii_case("system"));
    Some(if system {
        Label::system(id, name)
    } else {
        Label::new(id, name)
    })
}

fn parse_thread(value: Value, requested: &ThreadId) -> Result<ThreadResponse, GmailError> {
    let value = unwrap_key(value, "thread");
    let id = str_field(&value, &["id"]).unwrap_or_else(|| requested.as_str().to_string());
    let history_id = str_field(&value, &["historyId"]);

    // Raw API thread: normalize exactly like the HTTP backend
    let raw_shape = value
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|m| m.first())
        .is_some_and(|m| m.get("payload").is_some());
    if raw_shape {
        let thread = serde_json::from_value(value)
            .map_err(|e| GmailError::Parse(format!("thread {}: {}", id, e)))?;
        return Ok(normalize_thread(thread));
    }

    let messages = list_items(value, "messages")
        .into_iter()
        .filter_map(|item| {
            parse_message(item)
                .inspect_err(|e| warn!("Dropping message from thread {}: {}", id, e))
                .ok()
        })
        .collect();

    Ok(ThreadResponse {
        id: ThreadId::new(id),
        history_id,
        messages,
    })
}

/// The flattened message shape some CLIs print
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FlatMessage {
    id: String,
    #[serde(alias = "thread_id")]
    thread_id: String,
    from: String,
    to: String,
    cc: String,
    date: String,
    subject: String,
    #[serde(alias = "body", alias = "bodyText", alias = "text")]
    body_plain: Option<String>,
    #[serde(alias = "html")]
    body_html: Option<String>,
    snippet: String,
    #[serde(alias = "labelIds")]
    labels: Vec<String>,
    internal_date: Option<Value>,
    #[serde(alias = "rfc822MessageId")]
    message_id_header: Option<String>,
    references: Option<String>,
    attachments: Vec<Attachment>,
}

/// Parse one message in either the raw API or the flattened shape
fn parse_message(value: Value) -> Result<ThreadMessage, GmailError> {
    if value.get("payload").is_some() {
        let raw: GmailMessage =
            serde_json::from_value(value).map_err(|e| GmailError::Parse(e.to_string()))?;
        return normalize_message(raw);
    }

    let flat: FlatMessage =
        serde_json::from_value(value).map_err(|e| GmailError::Parse(e.to_string()))?;
    if flat.id.is_empty() {
        return Err(GmailError::Parse("message without id".to_string()));
    }

    let internal_date = match &flat.internal_date {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };
    let internal_date = match internal_date {
        0 => parse_date_header(&flat.date).map_or(0, |d| d.timestamp_millis()),
        millis => millis,
    };

    Ok(ThreadMessage::builder(MessageId::new(flat.id), ThreadId::new(flat.thread_id))
        .from(flat.from)
        .to(flat.to)
        .cc(flat.cc)
        .date(flat.date)
        .subject(flat.subject)
        .message_id_header(flat.message_id_header)
        .references(flat.references)
        .body_plain(flat.body_plain.filter(|b| !b.is_empty()))
        .body_html(flat.body_html.filter(|b| !b.is_empty()))
        .snippet(decode_entities(&flat.snippet))
        .label_ids(flat.labels)
        .internal_date(internal_date)
        .attachments(flat.attachments)
        .build())
}
