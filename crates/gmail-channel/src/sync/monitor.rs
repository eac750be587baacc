//! Long-lived polling loop for one account

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::handler::{AccountStatus, StatusSink};
use super::inbox::{InboxSync, PassStats};
use crate::error::GmailError;
use crate::gmail::ensure_label;
use crate::models::{Account, LabelId};

/// Polls one account until cancelled
///
/// Account settings arrive over a `watch` channel and are re-read at the top
/// of every cycle, so interval and allow-list changes apply without a
/// restart.
pub struct Monitor {
    sync: InboxSync,
    account: watch::Receiver<Account>,
    status: Arc<dyn StatusSink>,
    busy: AtomicBool,
}

impl Monitor {
    pub fn new(sync: InboxSync, account: watch::Receiver<Account>, status: Arc<dyn StatusSink>) -> Self {
        Self {
            sync,
            account,
            status,
            busy: AtomicBool::new(false),
        }
    }

    pub fn sync(&self) -> &InboxSync {
        &self.sync
    }

    /// The account as currently configured
    pub fn account(&self) -> Account {
        self.account.borrow().clone()
    }

    /// Run until `cancel` fires
    ///
    /// Returns early, after reporting a stopped status, when the account is
    /// disabled or its tooling or credentials are missing. Other startup
    /// failures are reported and the connection is retried every cycle.
    pub async fn run(&self, cancel: CancellationToken) {
        let email = self.account().email;

        let mut connected = match self.connect(&email).await {
            Ok(connected) => connected,
            Err(e) => {
                error!("{}: monitor not started: {}", email, e);
                self.report(AccountStatus::new(&email, false, false).with_error(&e));
                return;
            }
        };
        info!("{}: monitor started", email);

        loop {
            let interval = self.account().poll_interval();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let account = self.account();
            if !account.enabled {
                debug!("{}: disabled, skipping pass", account.email);
                continue;
            }

            if !connected {
                connected = match self.connect(&email).await {
                    Ok(connected) => connected,
                    Err(e) => {
                        error!("{}: monitor stopping: {}", email, e);
                        self.report(AccountStatus::new(&email, false, false).with_error(&e));
                        return;
                    }
                };
                if !connected {
                    continue;
                }
            }

            match self.poll_now(&cancel).await {
                None => {}
                Some(Ok(stats)) if stats.cancelled => break,
                Some(Ok(_)) => self.report(AccountStatus::new(&account.email, true, true)),
                Some(Err(e)) => {
                    warn!("{}: pass failed: {}", account.email, e);
                    self.report(AccountStatus::new(&account.email, true, false).with_error(&e));
                }
            }
        }

        info!("{}: monitor stopped", email);
        self.report(AccountStatus::new(&email, false, false));
    }

    /// Run one pass now unless one is already running
    ///
    /// Returns `None` when skipped because of a pass in flight.
    pub async fn poll_now(&self, cancel: &CancellationToken) -> Option<Result<PassStats, GmailError>> {
        let Some(_guard) = BusyGuard::try_acquire(&self.busy) else {
            debug!("{}: pass already in flight, skipping", self.account().email);
            return None;
        };
        let account = self.account();
        Some(self.sync.run_pass(&account, cancel).await)
    }

    /// Probe the backend and make sure the quarantine label exists
    async fn start(&self) -> Result<(), GmailError> {
        let account = self.account();
        if !account.enabled {
            return Err(GmailError::ConfigurationMissing(format!(
                "account {} is disabled",
                account.email
            )));
        }

        let client = self.sync.client();
        client.probe().await?;
        if let Err(e) = ensure_label(client.as_ref(), LabelId::QUARANTINE).await {
            warn!(
                "{}: could not ensure label {}: {}",
                account.email,
                LabelId::QUARANTINE,
                e
            );
        }
        Ok(())
    }

    /// Start the account and report the outcome
    ///
    /// `Ok(false)` means the backend is unreachable for now. `Err` is
    /// reserved for failures a retry cannot fix.
    async fn connect(&self, email: &str) -> Result<bool, GmailError> {
        match self.start().await {
            Ok(()) => {
                self.report(AccountStatus::new(email, true, true));
                Ok(true)
            }
            Err(e @ GmailError::ConfigurationMissing(_)) => Err(e),
            Err(e) => {
                warn!("{}: backend unavailable, retrying next cycle: {}", email, e);
                self.report(AccountStatus::new(email, true, false).with_error(&e));
                Ok(false)
            }
        }
    }

    fn report(&self, status: AccountStatus) {
        self.status.set_status(status);
    }
}

/// Clears the busy flag when the pass ends, however it ends
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_guard_is_exclusive_and_released() {
        let flag = AtomicBool::new(false);
        let guard = BusyGuard::try_acquire(&flag);
        assert!(guard.is_some());
        assert!(BusyGuard::try_acquire(&flag).is_none());
        drop(guard);
        assert!(BusyGuard::try_acquire(&flag).is_some());
    }
}
