//! Normalized inbound message handed to the agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{MessageId, ThreadId};

/// Who sent an inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Lowercased sender address
    pub id: String,
    /// Display name, if the From header had one
    pub name: Option<String>,
}

/// A message ready for dispatch
///
/// Created once from a provider payload and consumed exactly once by the
/// inbound handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
    /// Sanitized body text, with downloaded attachment paths appended
    pub text: String,
    pub subject: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    /// Local paths of attachments downloaded for this message
    pub attachments: Vec<PathBuf>,
    /// The normalized provider payload, opaque to the core
    pub raw: serde_json::Value,
}
