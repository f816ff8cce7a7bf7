//! # Secrets Manager
//!
//! Registry of live sessions. Each registered session owns one rotation task
//! that pushes fresh secrets over a single-slot channel; unregistering
//! cancels that task.

mod rotation;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::observability::metrics::record_session;
use crate::secrets::{Provisioner, Secret};
use crate::{Error, Result};

use rotation::RotationTask;

/// Registry entry for one session
#[derive(Debug)]
struct RotationHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Completion signal of a cancelled rotation task
#[derive(Debug)]
pub struct RotationCompletion {
    task: JoinHandle<()>,
}

impl RotationCompletion {
    /// Wait until the rotation task has exited and dropped its sender
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!(error = %e, "Rotation task panicked");
            }
        }
    }
}

/// Session registry and rotation task owner
pub struct SecretsManager {
    provisioner: Arc<dyn Provisioner>,
    rotation_period: Duration,
    sessions: DashMap<String, RotationHandle>,
    stop: CancellationToken,
    tracker: TaskTracker,
}

impl std::fmt::Debug for SecretsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsManager")
            .field("provisioner", &self.provisioner)
            .field("rotation_period", &self.rotation_period)
            .field("active_sessions", &self.sessions.len())
            .finish()
    }
}

impl SecretsManager {
    pub fn new(provisioner: Arc<dyn Provisioner>, rotation_period: Duration) -> Self {
        Self {
            provisioner,
            rotation_period,
            sessions: DashMap::new(),
            stop: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Tie every rotation task to a process-wide stop token
    pub fn with_stop(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    /// Start rotating secrets for `session_id`
    ///
    /// Returns immediately; the first fetch happens in the background. A
    /// session id that is already registered is replaced and its previous
    /// rotation task cancelled.
    pub fn register(
        &self,
        session_id: &str,
        resource_names: Vec<String>,
    ) -> mpsc::Receiver<Vec<Secret>> {
        let (updates, receiver) = mpsc::channel(1);
        let cancel = self.stop.child_token();

        debug!(session_id, resources = ?resource_names, "Registering session");

        let task = RotationTask {
            session_id: session_id.to_string(),
            resource_names,
            provisioner: self.provisioner.clone(),
            period: self.rotation_period,
            updates,
            cancel: cancel.clone(),
        };
        let task = self.tracker.spawn(task.run());

        match self.sessions.insert(session_id.to_string(), RotationHandle { cancel, task }) {
            Some(displaced) => {
                warn!(session_id, "Session re-registered, cancelling previous rotation task");
                displaced.cancel.cancel();
            }
            None => record_session(true),
        }

        receiver
    }

    /// Remove `session_id` and cancel its rotation task
    ///
    /// Does not wait for the task; use [`RotationCompletion::wait`] for that.
    pub fn unregister(&self, session_id: &str) -> Result<RotationCompletion> {
        let (_, handle) =
            self.sessions.remove(session_id).ok_or_else(|| Error::not_registered(session_id))?;

        handle.cancel.cancel();
        record_session(false);
        debug!(session_id, "Session unregistered");

        Ok(RotationCompletion { task: handle.task })
    }

    pub fn is_registered(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn provisioner(&self) -> &Arc<dyn Provisioner> {
        &self.provisioner
    }

    pub fn rotation_period(&self) -> Duration {
        self.rotation_period
    }

    /// Wait for every rotation task to exit
    ///
    /// Cancels nothing itself; call once the stop token has fired.
    pub async fn shutdown(&self) {
        self.tracker.close();
        info!(tasks = self.tracker.len(), "Waiting for rotation tasks to finish");
        self.tracker.wait().await;
        info!("All rotation tasks finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::testing::MockProvisioner;
    use crate::secrets::CERTIFICATE_RESOURCE;

    const PERIOD: Duration = Duration::from_secs(60);

    fn manager(provisioner: Arc<MockProvisioner>) -> SecretsManager {
        SecretsManager::new(provisioner, PERIOD)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_push_uses_requested_names_in_order() {
        let provisioner = Arc::new(MockProvisioner::default());
        let manager = manager(provisioner.clone());

        let mut updates = manager.register("s1", names(&["ca_certificate", "certificate"]));
        let secrets = updates.recv().await.unwrap();

        let got: Vec<&str> = secrets.iter().map(|s| s.name()).collect();
        assert_eq!(got, vec!["ca_certificate", "certificate"]);
        assert_eq!(provisioner.calls(), vec![names(&["ca_certificate", "certificate"])]);
        assert!(manager.is_registered("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_push_per_period() {
        let provisioner = Arc::new(MockProvisioner::default());
        let manager = manager(provisioner.clone());

        let mut updates = manager.register("s1", names(&[CERTIFICATE_RESOURCE]));
        let first = updates.recv().await.unwrap();
        assert_eq!(first[0].name(), "certificate");

        // Nothing more before the period elapses
        tokio::time::sleep(PERIOD - Duration::from_secs(1)).await;
        assert!(updates.try_recv().is_err());
        assert_eq!(provisioner.calls().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let second = updates.recv().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(provisioner.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_closes_channel_and_stops_fetching() {
        let provisioner = Arc::new(MockProvisioner::default());
        let manager = manager(provisioner.clone());

        let mut updates = manager.register("s1", names(&["certificate"]));
        updates.recv().await.unwrap();

        manager.unregister("s1").unwrap().wait().await;
        assert!(updates.recv().await.is_none());
        assert!(!manager.is_registered("s1"));

        tokio::time::sleep(PERIOD * 3).await;
        assert_eq!(provisioner.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_before_initial_fetch_completes() {
        let provisioner = Arc::new(MockProvisioner::with_delay(Duration::from_secs(30)));
        let manager = manager(provisioner.clone());

        let mut updates = manager.register("s1", names(&["certificate"]));
        tokio::task::yield_now().await;
        manager.unregister("s1").unwrap();

        // The channel closes without a value, well before the slow fetch would finish
        let closed = tokio::time::timeout(Duration::from_secs(1), updates.recv()).await;
        assert!(matches!(closed, Ok(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_unknown_session() {
        let manager = manager(Arc::new(MockProvisioner::default()));

        let err = manager.unregister("missing").unwrap_err();
        assert!(err.is_not_registered());

        let _updates = manager.register("s1", names(&["certificate"]));
        manager.unregister("s1").unwrap();
        assert!(manager.unregister("s1").unwrap_err().is_not_registered());
        assert_eq!(manager.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_fetch_failure_closes_channel() {
        let provisioner = Arc::new(MockProvisioner::failing_on(&[true]));
        let manager = manager(provisioner.clone());

        let mut updates = manager.register("s1", names(&["certificate"]));
        assert!(updates.recv().await.is_none());

        tokio::time::sleep(PERIOD * 3).await;
        assert_eq!(provisioner.calls().len(), 1);
        // Still registered until the stream unregisters it
        assert!(manager.is_registered("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_failure_keeps_schedule() {
        let provisioner = Arc::new(MockProvisioner::failing_on(&[false, true]));
        let manager = manager(provisioner.clone());

        let mut updates = manager.register("s1", names(&["certificate"]));
        updates.recv().await.unwrap();

        // Second call fails; nothing is delivered for that period
        tokio::time::sleep(PERIOD + Duration::from_secs(1)).await;
        assert_eq!(provisioner.calls().len(), 2);
        assert!(updates.try_recv().is_err());

        // Third call succeeds on the next tick
        let third = updates.recv().await.unwrap();
        match third[0].payload() {
            crate::secrets::SecretPayload::TlsCertificate(bundle) => {
                assert_eq!(bundle.certificate_chain(), b"chain-3")
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_consumer_delays_ticks() {
        let provisioner = Arc::new(MockProvisioner::default());
        let manager = manager(provisioner.clone());

        let mut updates = manager.register("s1", names(&["certificate"]));

        // Consumer never reads: one value fills the slot, the next fetch blocks on delivery
        tokio::time::sleep(PERIOD * 5).await;
        assert_eq!(provisioner.calls().len(), 2);

        let first = updates.recv().await.unwrap();
        let second = updates.recv().await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reregister_replaces_previous_task() {
        let provisioner = Arc::new(MockProvisioner::default());
        let manager = manager(provisioner.clone());

        let mut old = manager.register("s1", names(&["certificate"]));
        old.recv().await.unwrap();

        let mut new = manager.register("s1", names(&["ca_certificate"]));
        assert!(old.recv().await.is_none());
        assert_eq!(new.recv().await.unwrap()[0].name(), "ca_certificate");
        assert_eq!(manager.active_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_token_ends_all_tasks() {
        let stop = CancellationToken::new();
        let manager = manager(Arc::new(MockProvisioner::default())).with_stop(stop.clone());

        let mut a = manager.register("a", names(&["certificate"]));
        let mut b = manager.register("b", names(&["certificate"]));
        a.recv().await.unwrap();
        b.recv().await.unwrap();

        stop.cancel();
        manager.shutdown().await;

        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_stops_task() {
        let provisioner = Arc::new(MockProvisioner::default());
        let manager = manager(provisioner.clone());

        let updates = manager.register("s1", names(&["certificate"]));
        drop(updates);

        tokio::time::sleep(PERIOD * 3).await;
        assert_eq!(provisioner.calls().len(), 1);
        manager.unregister("s1").unwrap().wait().await;
    }
}
