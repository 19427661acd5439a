//! Integration tests for crash recovery against real processes
//!
//! These tests spawn a real `sleep` child to stand in for an orphaned
//! tunnel client left behind by a crashed host, then drive the recovery
//! coordinator end to end: registry lookup, operator notification, the
//! grace window, and the PID-matched kill.

#![cfg(unix)]

use async_trait::async_trait;
use frpwarden_core::process;
use frpwarden_core::recovery::{CrashRecoveryCoordinator, OperatorNotifier};
use frpwarden_core::registry::PidRegistry;
use frpwarden_core::supervisor::{
    spawn_supervisor, MockProcessAdapter, SupervisorConfig, SupervisorHandle,
};
use schema::TunnelSpec;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
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

fn fixture(data_dir: &Path) -> (Arc<PidRegistry>, SupervisorHandle, Arc<RecordingNotifier>) {
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

fn spawn_orphan() -> process::ChildProcess {
    process::spawn(
        Path::new("sleep"),
        &["30".to_string()],
        Path::new("/tmp"),
    )
    .expect("Failed to spawn stand-in orphan")
}

#[tokio::test]
async fn unhandled_orphan_is_reaped_after_grace() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, handle, notifier) = fixture(dir.path());

    let mut orphan = spawn_orphan();
    let pid = orphan.pid();
    registry.record("frpc", pid).unwrap();

    let coordinator =
        CrashRecoveryCoordinator::new(registry.clone(), handle.clone(), notifier.clone())
            .with_grace(Duration::from_millis(100));

    let grace_task = coordinator.run().await.expect("orphan found");
    assert_eq!(notifier.notified_pid.load(Ordering::SeqCst), pid);

    grace_task.await.expect("grace task ok");

    // The safety net killed the orphan and cleared the record
    let status = orphan.wait().await.expect("wait ok");
    assert!(!status.success());
    assert_eq!(registry.peek("frpc"), None);

    handle.shutdown().unwrap();
}

#[tokio::test]
async fn operator_kill_preempts_the_safety_net() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, handle, notifier) = fixture(dir.path());

    let mut orphan = spawn_orphan();
    let pid = orphan.pid();
    registry.record("frpc", pid).unwrap();

    let coordinator =
        CrashRecoveryCoordinator::new(registry.clone(), handle.clone(), notifier.clone())
            .with_grace(Duration::from_millis(200));

    let grace_task = coordinator.run().await.expect("orphan found");

    // The operator confirms the prompt before the grace window elapses
    assert!(handle.kill_by_recorded_pid(pid).await.unwrap());
    assert_eq!(registry.peek("frpc"), None);

    let status = orphan.wait().await.expect("wait ok");
    assert!(!status.success());

    // The safety net finds nothing left to do
    grace_task.await.expect("grace task ok");
    assert_eq!(registry.peek("frpc"), None);

    handle.shutdown().unwrap();
}

#[tokio::test]
async fn recorded_pid_mismatch_refuses_to_kill() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, handle, _notifier) = fixture(dir.path());

    let mut orphan = spawn_orphan();
    let pid = orphan.pid();
    registry.record("frpc", pid).unwrap();

    // A live but unrelated pid (our own) must be refused
    assert!(!handle.kill_by_recorded_pid(std::process::id()).await.unwrap());
    assert_eq!(registry.peek("frpc"), Some(pid));

    // The orphan is untouched; clean it up ourselves
    assert!(process::kill_pid(pid));
    let status = orphan.wait().await.expect("wait ok");
    assert!(!status.success());

    handle.shutdown().unwrap();
}
