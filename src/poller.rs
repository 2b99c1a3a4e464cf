//! Client side of the approval wait: after a login comes back
//! `awaiting_approval`, poll `GET /check-approval` until the super-admin
//! decides or the caller gives up.
//!
//! Failed ticks never end the wait. Approval takes minutes, so a flaky
//! network only delays the answer.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::ApprovalStatus;

/// Interval of the reference client.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, account_id: Uuid) -> anyhow::Result<ApprovalStatus>;
}

/// Reads status from a running server.
pub struct HttpStatusSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusSource {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self, account_id: Uuid) -> anyhow::Result<ApprovalStatus> {
        let status = self
            .client
            .get(format!("{}/check-approval", self.base_url))
            .query(&[("userId", account_id.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json::<ApprovalStatus>()
            .await?;
        Ok(status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Log in again; the earlier attempt was not queued.
    Approved,
    /// Contact an administrator.
    Declined,
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub interval: Duration,
    /// When set, the delay doubles after each failed tick up to this cap
    /// and snaps back to `interval` after a good one. A cap below `interval`
    /// keeps the delay at `interval`.
    pub max_backoff: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_backoff: None,
        }
    }
}

pub struct ApprovalPoller<S> {
    source: S,
    config: PollerConfig,
}

impl<S: StatusSource> ApprovalPoller<S> {
    pub fn new(source: S, config: PollerConfig) -> Self {
        Self { source, config }
    }

    /// Polls until a decision lands or `cancel` flips to `true` (or its
    /// sender is dropped). Dropping the returned future also stops it.
    pub async fn wait(&self, account_id: Uuid, mut cancel: watch::Receiver<bool>) -> PollOutcome {
        let mut delay = self.config.interval;
        loop {
            if *cancel.borrow() {
                return PollOutcome::Cancelled;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        info!(%account_id, "approval wait cancelled");
                        return PollOutcome::Cancelled;
                    }
                    continue;
                }
            }

            match self.source.fetch(account_id).await {
                Ok(status) if status.approved => {
                    info!(%account_id, "login approved");
                    return PollOutcome::Approved;
                }
                Ok(status) if status.declined => {
                    info!(%account_id, "login declined");
                    return PollOutcome::Declined;
                }
                Ok(_) => {
                    debug!(%account_id, "still waiting for approval");
                    delay = self.config.interval;
                }
                Err(e) => {
                    warn!(%account_id, error = %e, "status check failed; still waiting");
                    if let Some(cap) = self.config.max_backoff {
                        // A cap below the interval must not speed polling up.
                        delay = (delay * 2).min(cap.max(self.config.interval));
                    }
                }
            }
        }
    }
}
