//! Tunnel specification and state types for the frpwarden supervisor
//!
//! This module defines the specification of the supervised reverse-tunnel
//! client process and the state machine the supervisor moves it through.
//!
//! ## Lifecycle
//!
//! The supervised process progresses through the following states:
//! - `Stopped`: no child process exists
//! - `Starting`: the child process is being validated and spawned
//! - `Running`: the child process is live and its PID is recorded
//! - `Stopping`: the child process is being terminated
//!
//! Control operations always settle back into `Stopped` or `Running` by the
//! time they return; `Starting` and `Stopping` are only observable from
//! concurrent status queries.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Specification of the supervised tunnel client process
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TunnelSpec {
    /// Logical process name, used as the key in the PID store
    #[serde(default = "default_name")]
    pub name: String,

    /// Path to the tunnel client executable
    pub executable: PathBuf,

    /// Path to the tunnel client's TOML configuration file
    pub config_path: PathBuf,

    /// Data directory; the child's working directory and home of the PID file
    pub data_dir: PathBuf,

    /// Additional arguments appended after `-c <config>`
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Seconds to wait for graceful termination before escalating
    #[serde(default = "default_graceful_timeout_secs")]
    pub graceful_timeout_secs: u64,

    /// Seconds to wait after a forced kill before giving up
    #[serde(default = "default_kill_timeout_secs")]
    pub kill_timeout_secs: u64,

    /// Seconds to wait between stop and start during a restart
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,
}

impl TunnelSpec {
    /// Build a spec with the conventional file layout inside `data_dir`:
    /// the executable named for the platform and `frpc.toml` next to it.
    pub fn for_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            name: default_name(),
            executable: data_dir.join(executable_name("frpc")),
            config_path: data_dir.join("frpc.toml"),
            data_dir,
            extra_args: Vec::new(),
            graceful_timeout_secs: default_graceful_timeout_secs(),
            kill_timeout_secs: default_kill_timeout_secs(),
            settle_delay_secs: default_settle_delay_secs(),
        }
    }

    /// Full argument vector the child is invoked with
    pub fn argv(&self) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            self.config_path.display().to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Get the graceful termination window as a Duration
    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_timeout_secs)
    }

    /// Get the forced-kill confirmation window as a Duration
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }

    /// Get the restart settle delay as a Duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

fn default_name() -> String {
    "frpc".to_string()
}

const fn default_graceful_timeout_secs() -> u64 {
    3
}

const fn default_kill_timeout_secs() -> u64 {
    2
}

const fn default_settle_delay_secs() -> u64 {
    1
}

/// Platform-specific executable file name for a base name
pub fn executable_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", base)
    } else {
        base.to_string()
    }
}

/// Current state of the supervised process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SupervisorState {
    /// No child process exists
    Stopped,
    /// The child process is being validated and spawned
    Starting,
    /// The child process is live
    Running,
    /// The child process is being terminated
    Stopping,
}

impl SupervisorState {
    /// Check if a child process is live (or being torn down)
    pub fn is_running(&self) -> bool {
        !matches!(self, SupervisorState::Stopped)
    }

    /// Check if the state is transitional
    pub fn is_transitional(&self) -> bool {
        matches!(self, SupervisorState::Starting | SupervisorState::Stopping)
    }
}

impl Default for SupervisorState {
    fn default() -> Self {
        SupervisorState::Stopped
    }
}

/// Information about a supervised process exit
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessExit {
    /// Process ID that exited
    pub pid: u32,

    /// Exit code (None if killed by signal)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Signal that killed the process (Unix only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,

    /// Timestamp when the exit was detected
    pub timestamp: String,
}

impl ProcessExit {
    /// Check if this represents a successful exit (code 0)
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_for_data_dir_uses_conventional_layout() {
        let spec = TunnelSpec::for_data_dir("/srv/frpwarden");
        assert_eq!(spec.name, "frpc");
        assert_eq!(spec.data_dir, PathBuf::from("/srv/frpwarden"));
        assert!(spec.config_path.ends_with("frpc.toml"));
        assert_eq!(spec.graceful_timeout_secs, 3);
        assert_eq!(spec.kill_timeout_secs, 2);
        assert_eq!(spec.settle_delay_secs, 1);
    }

    #[test]
    fn argv_passes_config_flag_first() {
        let mut spec = TunnelSpec::for_data_dir("/srv/frpwarden");
        spec.extra_args = vec!["--strict".to_string()];
        let argv = spec.argv();
        assert_eq!(argv[0], "-c");
        assert!(argv[1].ends_with("frpc.toml"));
        assert_eq!(argv[2], "--strict");
    }

    #[test]
    fn state_helpers() {
        assert!(!SupervisorState::Stopped.is_running());
        assert!(SupervisorState::Running.is_running());
        assert!(SupervisorState::Starting.is_transitional());
        assert!(SupervisorState::Stopping.is_transitional());
        assert!(!SupervisorState::Running.is_transitional());
        assert_eq!(SupervisorState::default(), SupervisorState::Stopped);
    }

    #[test]
    fn exit_success_helper() {
        let exit = ProcessExit {
            pid: 42,
            exit_code: Some(0),
            signal: None,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
        };
        assert!(exit.is_success());

        let killed = ProcessExit {
            pid: 42,
            exit_code: None,
            signal: Some(9),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
        };
        assert!(!killed.is_success());
    }

    #[cfg(unix)]
    #[test]
    fn executable_name_has_no_suffix_on_unix() {
        assert_eq!(executable_name("frpc"), "frpc");
    }
}
