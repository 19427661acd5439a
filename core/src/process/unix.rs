//! Unix process management with safe spawn/kill using process groups
//!
//! Spawned children are placed in their own process group via `setsid()`,
//! which lets the supervisor signal the entire process tree by targeting the
//! group. SIGTERM is used for graceful termination and SIGKILL for forced
//! termination. `ESRCH`/`EPERM` from a signal mean the group is already gone
//! and are treated as success.

// Process management requires libc::setsid() in pre_exec
#![allow(unsafe_code)]

use crate::{CoreError, Result};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, error, warn};

/// A child process managed with Unix process groups
///
/// The process is guaranteed to be in its own process group, allowing
/// reliable cleanup of the entire process tree.
#[derive(Debug)]
pub struct ChildProcess {
    /// The process ID of the spawned child (also its process group ID)
    pid: Pid,
    /// The underlying handle for waiting and status checking
    child: Child,
}

/// Spawn the given executable in its own process group
///
/// The child runs with `working_dir` as its current directory and with
/// stdout and stderr piped so the caller can relay its output. `setsid()`
/// is called in the child before `exec()`; it is async-signal-safe and
/// appropriate for use in `pre_exec`.
pub fn spawn(executable: &Path, args: &[String], working_dir: &Path) -> Result<ChildProcess> {
    debug!("Spawning {} {:?} in {}", executable.display(), args, working_dir.display());

    let mut command = Command::new(executable);
    command.args(args);
    command.current_dir(working_dir);
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    #[deny(unsafe_op_in_unsafe_fn)]
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command.spawn().map_err(|e| {
        error!("Failed to spawn '{}': {}", executable.display(), e);
        CoreError::SpawnFailure(format!("Failed to spawn '{}': {}", executable.display(), e))
    })?;

    let raw_pid = child
        .id()
        .ok_or_else(|| CoreError::SpawnFailure("Spawned child did not have a PID".to_string()))?;
    let pid = Pid::from_raw(raw_pid as i32);
    debug!("Spawned process {} in new process group", pid);

    Ok(ChildProcess { pid, child })
}

impl ChildProcess {
    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Wait for the process to exit and return its exit status
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child.wait().await.map_err(|e| {
            CoreError::SupervisorError(format!("Failed to wait for process {}: {}", self.pid, e))
        })
    }

    /// Send SIGTERM to the process group for graceful termination
    pub fn terminate(&self) -> Result<()> {
        signal_group(self.pid, Signal::SIGTERM)
    }

    /// Send SIGKILL to the process group for forced termination
    pub fn kill(&self) -> Result<()> {
        signal_group(self.pid, Signal::SIGKILL)
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

/// Send a signal to an entire process group
///
/// `ESRCH` means the group no longer exists and `EPERM` means it changed
/// ownership (both imply the child already exited); either is success.
fn signal_group(pid: Pid, signal: Signal) -> Result<()> {
    debug!("Sending {:?} to process group {}", signal, pid);

    match killpg(pid, signal) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) | Err(nix::errno::Errno::EPERM) => {
            debug!("Process group {} already exited", pid);
            Ok(())
        }
        Err(e) => {
            error!("Failed to send {:?} to process group {}: {}", signal, pid, e);
            Err(CoreError::SupervisorError(format!(
                "Failed to send {:?} to process group {}: {}",
                signal, pid, e
            )))
        }
    }
}

/// Probe whether a process with the given PID is alive
///
/// Uses the zero-signal check: `kill(pid, 0)` succeeds (or fails with
/// `EPERM`) when the process exists. The image name is not matched on
/// POSIX; the kernel check by PID is considered sufficient here.
pub fn pid_alive(pid: u32, _image: &str) -> Result<bool> {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::EPERM) => Ok(true),
        Err(nix::errno::Errno::ESRCH) => Ok(false),
        Err(e) => Err(CoreError::ProbeFailure(format!(
            "Liveness check for pid {} failed: {}",
            pid, e
        ))),
    }
}

/// Send SIGKILL to a single PID (not its group)
///
/// Used for orphan cleanup where only the recorded PID is known. Returns
/// whether the kernel accepted the signal; a dead target is a failure.
pub fn kill_pid(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => true,
        Err(e) => {
            warn!("SIGKILL for pid {} failed: {}", pid, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn bin(name: &str) -> PathBuf {
        // Resolved via PATH by the OS
        PathBuf::from(name)
    }

    #[tokio::test]
    async fn spawn_simple_command() {
        let child = spawn(&bin("echo"), &["hello".to_string()], Path::new("/tmp"))
            .expect("Failed to spawn echo");
        assert!(child.pid() > 0);
    }

    #[tokio::test]
    async fn spawn_and_wait() {
        let mut child =
            spawn(&bin("true"), &[], Path::new("/tmp")).expect("Failed to spawn true");
        let status = child.wait().await.expect("Failed to wait for process");
        assert!(status.success());
    }

    #[tokio::test]
    async fn spawn_nonexistent_command() {
        let result = spawn(&bin("nonexistent_command_12345"), &[], Path::new("/tmp"));
        match result.unwrap_err() {
            CoreError::SpawnFailure(_) => {}
            e => panic!("Expected SpawnFailure, got: {}", e),
        }
    }

    #[tokio::test]
    async fn terminate_on_exited_process_is_ok() {
        let mut child =
            spawn(&bin("true"), &[], Path::new("/tmp")).expect("Failed to spawn true");
        child.wait().await.expect("wait ok");
        // Group is gone; ESRCH is treated as success
        assert!(child.terminate().is_ok());
        assert!(child.kill().is_ok());
    }

    #[tokio::test]
    async fn pid_alive_for_own_process() {
        assert!(pid_alive(std::process::id(), "frpc").expect("probe ok"));
    }

    #[tokio::test]
    async fn pid_alive_for_dead_pid() {
        assert!(!pid_alive(99999, "frpc").expect("probe ok"));
    }

    #[tokio::test]
    async fn kill_pid_terminates_a_child() {
        let mut child = spawn(&bin("sleep"), &["30".to_string()], Path::new("/tmp"))
            .expect("Failed to spawn sleep");
        assert!(kill_pid(child.pid()));
        let status = child.wait().await.expect("wait ok");
        assert!(!status.success());
    }

    #[tokio::test]
    async fn kill_pid_on_dead_pid_reports_failure() {
        assert!(!kill_pid(99999));
    }
}
