//! Termination strategy: graceful, then forced, then give up loudly
//!
//! The [`Terminator`] owns the kill escalation for a live child: a
//! cooperative stop signal with a bounded wait, a forced kill with a
//! shorter wait, and an [`TerminationOutcome::Unconfirmed`] verdict when
//! both windows elapse. The broad image-name fallback for unconfirmed
//! terminations is a separate, Windows-only operation the supervisor
//! invokes explicitly.

use crate::process;
use crate::supervisor::ManagedProcess;
use schema::{ProcessExit, TunnelSpec};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Result of a termination attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationOutcome {
    /// The process exited within the graceful window
    Graceful(ProcessExit),
    /// The process had to be killed and exited within the forced window
    Forced(ProcessExit),
    /// Kill attempts were exhausted without a verified death
    Unconfirmed,
}

/// OS-aware process-kill strategy
#[derive(Debug, Clone, Copy)]
pub struct Terminator {
    graceful_wait: Duration,
    forced_wait: Duration,
}

impl Terminator {
    /// Create a terminator with explicit wait windows
    pub fn new(graceful_wait: Duration, forced_wait: Duration) -> Self {
        Self {
            graceful_wait,
            forced_wait,
        }
    }

    /// Create a terminator using the spec's timeout knobs
    pub fn for_spec(spec: &TunnelSpec) -> Self {
        Self::new(spec.graceful_timeout(), spec.kill_timeout())
    }

    /// Terminate a live child, escalating from graceful to forced
    ///
    /// Sends the cooperative stop signal and waits up to the graceful
    /// window; if the process is still running, sends the forced kill and
    /// waits up to the forced window. Signal failures are logged but do
    /// not abort the escalation; the outcome reflects only what could be
    /// verified.
    pub async fn terminate(&self, process: &mut dyn ManagedProcess) -> TerminationOutcome {
        let pid = process.pid();

        if let Err(e) = process.terminate().await {
            warn!("Graceful stop signal for pid {} failed: {}", pid, e);
        }

        match timeout(self.graceful_wait, process.wait()).await {
            Ok(Ok(exit)) => {
                debug!("Process {} exited gracefully", pid);
                return TerminationOutcome::Graceful(exit);
            }
            Ok(Err(e)) => {
                error!("Error waiting for pid {} after stop signal: {}", pid, e);
            }
            Err(_) => {
                warn!(
                    "Process {} did not exit within {:?}, sending forced kill",
                    pid, self.graceful_wait
                );
            }
        }

        if let Err(e) = process.kill().await {
            error!("Forced kill for pid {} failed: {}", pid, e);
        }

        match timeout(self.forced_wait, process.wait()).await {
            Ok(Ok(exit)) => {
                debug!("Process {} exited after forced kill", pid);
                TerminationOutcome::Forced(exit)
            }
            _ => TerminationOutcome::Unconfirmed,
        }
    }

    /// One-shot platform-native kill of an arbitrary PID
    ///
    /// Returns whether the OS reported success; the target is not
    /// re-verified to be gone.
    pub fn kill_by_pid(&self, pid: u32) -> bool {
        process::kill_pid(pid)
    }

    /// Kill every process running the given image name
    ///
    /// Last-resort cleanup after an unconfirmed termination. PID-based
    /// kills are considered sufficient elsewhere.
    #[cfg(windows)]
    pub fn kill_all_by_name(&self, image: &str) -> bool {
        process::kill_all_by_image(image)
    }
}
