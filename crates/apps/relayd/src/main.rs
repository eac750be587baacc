//! relayd - Headless Gmail channel daemon
//!
//! Loads `relay.json`, starts one monitor per enabled account and logs
//! every inbound message. Account settings are re-read from disk once a
//! minute and pushed to the running monitors.

use anyhow::{Context, Result};
use async_trait::async_trait;
use gmail_channel::config::RELAY_CONFIG_FILE;
use gmail_channel::{
    Account, AccountStatus, ApiGmailClient, Backend, CliGmailClient, DispatchLimiter, FileSessionStore,
    GmailClient, GmailCredentials, InboundHandler, InboundMessage, InboxSync, Monitor, RelayConfig,
    SessionStore, StatusSink,
};
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// Logs inbound messages as JSON lines
struct LogHandler;

#[async_trait]
impl InboundHandler for LogHandler {
    async fn on_message(&self, message: InboundMessage) -> Result<()> {
        info!(
            "Inbound {} in {} from {}: {}",
            message.id,
            message.thread_id,
            message.sender.id,
            message.subject
        );
        let line = serde_json::json!({
            "id": message.id,
            "threadId": message.thread_id,
            "sender": message.sender,
            "subject": message.subject,
            "text": message.text,
            "timestamp": message.timestamp,
            "attachments": message.attachments,
        });
        println!("{}", line);
        Ok(())
    }
}

struct LogStatus;

impl StatusSink for LogStatus {
    fn set_status(&self, status: AccountStatus) {
        match &status.error {
            Some(e) => warn!(
                "{}: running={} connected={} error={}",
                status.account_id, status.running, status.connected, e
            ),
            None => info!(
                "{}: running={} connected={}",
                status.account_id, status.running, status.connected
            ),
        }
    }
}

/// Build the client for an account's backend
///
/// API credentials are loaded on first use and shared by every API account.
fn build_client(
    account: &Account,
    credentials: &mut Option<GmailCredentials>,
) -> Result<Arc<dyn GmailClient>> {
    match &account.backend {
        Backend::Cli { executable } => Ok(Arc::new(CliGmailClient::new(executable.clone(), account.email.clone()))),
        Backend::Api => {
            if credentials.is_none() {
                *credentials = Some(GmailCredentials::load().context("Failed to load Gmail credentials")?);
            }
            let creds = credentials
                .clone()
                .context("Gmail credentials unavailable")?;
            Ok(Arc::new(ApiGmailClient::new(account.email.clone(), creds)))
        }
    }
}

/// Push changed account settings to running monitors until cancelled
async fn reload_accounts(senders: HashMap<String, watch::Sender<Account>>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(RELOAD_INTERVAL) => {}
        }

        let relay = match RelayConfig::load() {
            Ok(relay) => relay,
            Err(e) => {
                warn!("Keeping current settings, reload failed: {:#}", e);
                continue;
            }
        };
        for (email, sender) in &senders {
            let Some(updated) = relay.account(email) else {
                continue;
            };
            let changed = sender.send_if_modified(|current| {
                if *current == *updated {
                    return false;
                }
                *current = updated.clone();
                true
            });
            if changed {
                info!("{}: settings reloaded", email);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    if !config::config_exists(RELAY_CONFIG_FILE) {
        let template = RelayConfig {
            accounts: vec![Account::new("you@example.com").with_allow_from(vec!["@example.com".into()])],
            ..Default::default()
        };
        config::save_json(RELAY_CONFIG_FILE, &template)?;
        warn!(
            "Wrote a template {} to {}; edit it and restart",
            RELAY_CONFIG_FILE,
            config::config_dir().map(|d| d.display().to_string()).unwrap_or_default()
        );
        return Ok(());
    }

    let relay = RelayConfig::load().context("Failed to load relay configuration")?;
    let limiter = DispatchLimiter::new(relay.max_concurrent_dispatch);
    let attachments_root = relay.attachments_root();
    let sessions: Arc<dyn SessionStore> = match FileSessionStore::open_default() {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("{:#}; keeping sessions next to attachments", e);
            Arc::new(FileSessionStore::new(&attachments_root))
        }
    };
    let handler: Arc<dyn InboundHandler> = Arc::new(LogHandler);
    let status: Arc<dyn StatusSink> = Arc::new(LogStatus);

    let cancel = CancellationToken::new();
    let mut monitors = JoinSet::new();
    let mut senders = HashMap::new();
    let mut credentials = None;

    for account in relay.accounts.iter().filter(|a| a.enabled) {
        let client = match build_client(account, &mut credentials) {
            Ok(client) => client,
            Err(e) => {
                error!("{}: {:#}", account.email, e);
                status.set_status(AccountStatus::new(&account.email, false, false).with_error(format!("{:#}", e)));
                continue;
            }
        };

        let (tx, rx) = watch::channel(account.clone());
        let sync = InboxSync::new(client, Arc::clone(&handler), limiter.clone())
            .with_session_store(Arc::clone(&sessions))
            .with_attachments_root(&attachments_root);
        let monitor = Monitor::new(sync, rx, Arc::clone(&status));
        let token = cancel.child_token();
        monitors.spawn(async move { monitor.run(token).await });
        senders.insert(account.email.clone(), tx);
    }

    if monitors.is_empty() {
        warn!("No enabled accounts in {}", RELAY_CONFIG_FILE);
        return Ok(());
    }
    info!("Monitoring {} account(s)", monitors.len());

    let reload = tokio::spawn(reload_accounts(senders, cancel.child_token()));

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    cancel.cancel();

    while let Some(result) = monitors.join_next().await {
        if let Err(e) = result {
            error!("Monitor task failed: {}", e);
        }
    }
    let _ = reload.await;
    Ok(())
}
