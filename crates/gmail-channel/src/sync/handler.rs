//! Seams between the sync engine and its host

use async_trait::async_trait;
use serde::Serialize;

use crate::models::InboundMessage;

/// Receives each new inbound message
///
/// Returning an error marks the dispatch failed; the message stays unread
/// and is offered again on the next pass.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_message(&self, message: InboundMessage) -> anyhow::Result<()>;
}

/// Health of one monitored account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    pub account_id: String,
    pub running: bool,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AccountStatus {
    pub fn new(account_id: impl Into<String>, running: bool, connected: bool) -> Self {
        Self {
            account_id: account_id.into(),
            running,
            connected,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Receives status updates after every pass and on startup failures
pub trait StatusSink: Send + Sync {
    fn set_status(&self, status: AccountStatus);
}
