//! Crash recovery: detect and reap orphaned tunnel processes on startup
//!
//! When the host dies without a clean shutdown, the tunnel client keeps
//! running and its PID stays recorded on disk. On the next host startup
//! the coordinator consults the registry; a live orphan is not killed
//! silently — operators are notified first and given a grace window to
//! inspect it or kill it themselves via the explicit
//! [`SupervisorHandle::kill_by_recorded_pid`] action. Only when nobody
//! acts within the window does the coordinator invoke the kill itself.

use crate::registry::PidRegistry;
use crate::supervisor::SupervisorHandle;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Grace window before an unhandled orphan is reaped automatically
pub const RECOVERY_GRACE: Duration = Duration::from_secs(30);

/// Seam through which eligible operators are told about an orphan
///
/// The host decides how to surface the prompt (chat message, log line,
/// dashboard); the coordinator only reports the finding.
#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    /// An orphaned process was found still running
    async fn orphan_detected(&self, name: &str, pid: u32);
}

/// Notifier that surfaces the orphan through the host logger
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl OperatorNotifier for LogNotifier {
    async fn orphan_detected(&self, name: &str, pid: u32) {
        warn!(
            "Detected orphaned '{}' process (pid {}) from a previous session; \
             run `frpwarden kill-pid {}` to terminate it now, or wait for \
             automatic cleanup",
            name, pid, pid
        );
    }
}

/// Startup coordinator reaping processes left over from a crashed host
pub struct CrashRecoveryCoordinator {
    registry: Arc<PidRegistry>,
    handle: SupervisorHandle,
    notifier: Arc<dyn OperatorNotifier>,
    grace: Duration,
}

impl CrashRecoveryCoordinator {
    /// Create a coordinator with the standard grace window
    pub fn new(
        registry: Arc<PidRegistry>,
        handle: SupervisorHandle,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        Self {
            registry,
            handle,
            notifier,
            grace: RECOVERY_GRACE,
        }
    }

    /// Override the grace window
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run the recovery check once
    ///
    /// Returns the handle of the grace-window task when a live orphan was
    /// found, `None` otherwise. The registry lookup self-heals stale
    /// records, so a dead orphan costs nothing beyond the probe.
    pub async fn run(&self) -> Option<JoinHandle<()>> {
        let name = self.handle.spec.name.clone();
        let pid = match self.registry.check(&name) {
            Some(pid) => pid,
            None => {
                debug!("No orphaned '{}' process recorded", name);
                return None;
            }
        };

        warn!("Orphaned '{}' process (pid {}) is still running", name, pid);
        self.notifier.orphan_detected(&name, pid).await;

        let registry = self.registry.clone();
        let handle = self.handle.clone();
        let grace = self.grace;
        Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            // Only act if the same record is still present and alive; an
            // operator kill or a fresh start supersedes the safety net
            if registry.check(&name) != Some(pid) {
                debug!("Orphaned '{}' process already handled", name);
                return;
            }

            warn!(
                "No operator handled the orphaned '{}' process within {:?}, terminating it",
                name, grace
            );
            match handle.kill_by_recorded_pid(pid).await {
                Ok(true) => info!("Terminated orphaned '{}' process (pid {})", name, pid),
                Ok(false) => warn!(
                    "Could not terminate orphaned '{}' process (pid {}); manual cleanup required",
                    name, pid
                ),
                Err(e) => warn!("Orphan cleanup for '{}' failed: {}", name, e),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::{spawn_supervisor, MockProcessAdapter, SupervisorConfig};
    use schema::TunnelSpec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::broadcast;

    struct RecordingNotifier {
        notified_pid: AtomicU32,
    }

    #[async_trait]
    impl OperatorNotifier for RecordingNotifier {
        async fn orphan_detected(&self, _name: &str, pid: u32) {
            self.notified_pid.store(pid, Ordering::SeqCst);
        }
    }

    fn coordinator_fixture(
        data_dir: &std::path::Path,
    ) -> (Arc<PidRegistry>, SupervisorHandle, Arc<RecordingNotifier>) {
        let spec = TunnelSpec::for_data_dir(data_dir);
        let registry = Arc::new(PidRegistry::new(data_dir));
        let (event_tx, _event_rx) = broadcast::channel(16);
        let handle = spawn_supervisor(SupervisorConfig {
            spec,
            process_adapter: Arc::new(MockProcessAdapter::new()),
            registry: registry.clone(),
            event_tx,
        });
        let notifier = Arc::new(RecordingNotifier {
            notified_pid: AtomicU32::new(0),
        });
        (registry, handle, notifier)
    }

    #[tokio::test]
    async fn empty_registry_means_no_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, handle, notifier) = coordinator_fixture(dir.path());

        let coordinator =
            CrashRecoveryCoordinator::new(registry, handle.clone(), notifier.clone());
        assert!(coordinator.run().await.is_none());
        assert_eq!(notifier.notified_pid.load(Ordering::SeqCst), 0);

        handle.shutdown().unwrap();
    }

    #[tokio::test]
    async fn dead_orphan_is_cleared_without_notification() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, handle, notifier) = coordinator_fixture(dir.path());

        registry.record("frpc", 99999).unwrap();

        let coordinator =
            CrashRecoveryCoordinator::new(registry.clone(), handle.clone(), notifier.clone());
        assert!(coordinator.run().await.is_none());
        assert_eq!(notifier.notified_pid.load(Ordering::SeqCst), 0);
        // The stale record was self-healed by the lookup
        assert_eq!(registry.peek("frpc"), None);

        handle.shutdown().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn live_orphan_triggers_notification() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, handle, notifier) = coordinator_fixture(dir.path());

        // Our own pid stands in for a live orphan
        registry.record("frpc", std::process::id()).unwrap();

        let coordinator = CrashRecoveryCoordinator::new(
            registry.clone(),
            handle.clone(),
            notifier.clone(),
        )
        .with_grace(Duration::from_secs(3600));

        let grace_task = coordinator.run().await.expect("orphan found");
        assert_eq!(
            notifier.notified_pid.load(Ordering::SeqCst),
            std::process::id()
        );

        // Keep the safety net from firing on our own process
        grace_task.abort();
        registry.clear("frpc").unwrap();
        handle.shutdown().unwrap();
    }
}
