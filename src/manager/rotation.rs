//! Per-session rotation task
//!
//! Fetches the session's secrets once, hands them to the stream, then
//! re-fetches on a fixed period until cancelled. Dropping the task drops the
//! sender, which is how the stream learns that rotation has ended.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::observability::metrics::{record_provisioner_fetch, FetchPhase};
use crate::secrets::{Provisioner, Secret};
use crate::Result;

pub(crate) struct RotationTask {
    pub(crate) session_id: String,
    pub(crate) resource_names: Vec<String>,
    pub(crate) provisioner: Arc<dyn Provisioner>,
    pub(crate) period: Duration,
    pub(crate) updates: mpsc::Sender<Vec<Secret>>,
    pub(crate) cancel: CancellationToken,
}

impl RotationTask {
    pub(crate) async fn run(self) {
        let secrets = match self.fetch(FetchPhase::Initial).await {
            Some(Ok(secrets)) => secrets,
            Some(Err(e)) => {
                error!(
                    session_id = %self.session_id,
                    resources = ?self.resource_names,
                    error = %e,
                    "Initial secret fetch failed, rotation will not start"
                );
                return;
            }
            None => {
                debug!(session_id = %self.session_id, "Rotation cancelled during initial fetch");
                return;
            }
        };

        if !self.deliver(secrets).await {
            return;
        }

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(session_id = %self.session_id, "Rotation cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.fetch(FetchPhase::Rotation).await {
                Some(Ok(secrets)) => {
                    if !self.deliver(secrets).await {
                        return;
                    }
                    info!(session_id = %self.session_id, "Secrets rotated");
                }
                Some(Err(e)) => {
                    warn!(
                        session_id = %self.session_id,
                        error = %e,
                        "Secret rotation fetch failed, keeping previous secrets"
                    );
                }
                None => {
                    debug!(session_id = %self.session_id, "Rotation cancelled during fetch");
                    return;
                }
            }
        }
    }

    /// `None` when cancelled before the provisioner answered
    async fn fetch(&self, phase: FetchPhase) -> Option<Result<Vec<Secret>>> {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            result = self.provisioner.get_resources(&self.session_id, &self.resource_names) => result,
        };

        record_provisioner_fetch(phase, result.is_ok());
        Some(result)
    }

    /// Blocks until the stream takes the update; `false` means stop rotating
    async fn deliver(&self, secrets: Vec<Secret>) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(session_id = %self.session_id, "Rotation cancelled during delivery");
                false
            }
            sent = self.updates.send(secrets) => match sent {
                Ok(()) => true,
                Err(_) => {
                    debug!(session_id = %self.session_id, "Update receiver dropped, stopping rotation");
                    false
                }
            },
        }
    }
}
