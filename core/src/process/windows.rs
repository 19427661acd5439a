//! Windows process management via the child handle and OS utilities
//!
//! Windows has no cooperative termination signal for console children, so
//! "graceful" and forced termination both resolve to `TerminateProcess`
//! through the tokio child handle. Liveness probing enumerates processes
//! with `tasklist` and matches both the PID and the image name, which
//! guards against PID reuse. One-shot kills go through `taskkill`, with an
//! image-wide variant available as the supervisor's last-resort fallback.

use crate::{CoreError, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, error, warn};

/// A child process managed through its Windows handle
#[derive(Debug)]
pub struct ChildProcess {
    /// The process ID of the spawned child
    pid: u32,
    /// The underlying handle for waiting and status checking
    child: Child,
}

/// Spawn the given executable with piped output
///
/// The child runs with `working_dir` as its current directory and with
/// stdout and stderr piped so the caller can relay its output.
pub fn spawn(executable: &Path, args: &[String], working_dir: &Path) -> Result<ChildProcess> {
    debug!("Spawning {} {:?} in {}", executable.display(), args, working_dir.display());

    let mut command = Command::new(executable);
    command.args(args);
    command.current_dir(working_dir);
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let child = command.spawn().map_err(|e| {
        error!("Failed to spawn '{}': {}", executable.display(), e);
        CoreError::SpawnFailure(format!("Failed to spawn '{}': {}", executable.display(), e))
    })?;

    let pid = child
        .id()
        .ok_or_else(|| CoreError::SpawnFailure("Spawned child did not have a PID".to_string()))?;
    debug!("Spawned process {}", pid);

    Ok(ChildProcess { pid, child })
}

impl ChildProcess {
    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for the process to exit and return its exit status
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child.wait().await.map_err(|e| {
            CoreError::SupervisorError(format!("Failed to wait for process {}: {}", self.pid, e))
        })
    }

    /// Request termination of the child
    ///
    /// Windows offers no SIGTERM equivalent for console children; this is
    /// `TerminateProcess` through the handle.
    pub fn terminate(&mut self) -> Result<()> {
        self.child.start_kill().map_err(|e| {
            CoreError::SupervisorError(format!(
                "Failed to terminate process {}: {}",
                self.pid, e
            ))
        })
    }

    /// Forcefully kill the child
    pub fn kill(&mut self) -> Result<()> {
        self.terminate()
    }

    /// Take the stdout handle for async reading, if available
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stderr handle for async reading, if available
    pub fn take_stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.child.stderr.take()
    }
}

/// Probe whether a process with the given PID and image name is alive
///
/// Enumerates with `tasklist /FI "PID eq <pid>"` and requires the output
/// to name both the PID and the image, so a recycled PID running an
/// unrelated binary does not count as alive.
pub fn pid_alive(pid: u32, image: &str) -> Result<bool> {
    let output = std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/FO", "CSV", "/NH"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| CoreError::ProbeFailure(format!("tasklist failed: {}", e)))?;

    let listing = String::from_utf8_lossy(&output.stdout);
    let needle = image.to_lowercase();
    let alive = listing.lines().any(|line| {
        line.to_lowercase().contains(&needle) && line.contains(&pid.to_string())
    });
    Ok(alive)
}

/// Forcefully kill a single PID via `taskkill`
///
/// Returns whether the OS command itself reported success; the target is
/// not re-verified to be gone.
pub fn kill_pid(pid: u32) -> bool {
    match std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(e) => {
            warn!("taskkill for pid {} failed: {}", pid, e);
            false
        }
    }
}

/// Forcefully kill every process running the given image name
///
/// Broad fallback for unconfirmed terminations. This takes down unrelated
/// instances of the same binary deployed on the machine.
pub fn kill_all_by_image(image: &str) -> bool {
    match std::process::Command::new("taskkill")
        .args(["/F", "/IM", image])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(e) => {
            warn!("taskkill for image {} failed: {}", image, e);
            false
        }
    }
}
