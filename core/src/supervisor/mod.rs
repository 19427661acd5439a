//! Process supervisor for the tunnel client
//!
//! This module owns the lifecycle state machine for the supervised binary.
//! It composes the PID registry, the terminator, and the output relay.
//!
//! ## Architecture
//!
//! The supervisor runs as a dedicated tokio task that consumes control
//! messages serially, so only one start/stop/restart is ever in flight:
//!
//! ```text
//! Stopped → Starting → Running → Stopping → Stopped
//! ```
//!
//! Status queries never touch the task: the current state is published on
//! a watch channel and read lock-free from the handle. The task also
//! observes the child's exit asynchronously, which is the only path that
//! can transition to `Stopped` outside an explicit stop.
//!
//! ## Components
//!
//! - [`SupervisorHandle`]: control interface for supervisor operations
//! - [`ControlMsg`]: messages for controlling the process lifecycle
//! - [`ProcessAdapter`]: trait for abstracting process management
//! - [`ProcessSupervisor`]: the task managing state transitions

use crate::registry::PidRegistry;
use crate::{CoreError, Result};
use schema::{SupervisorState, TunnelEvent, TunnelSpec};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{error, info};

pub mod adapters;
pub mod task;


pub use adapters::*;
pub use task::*;

/// Control messages for supervisor operations
#[derive(Debug)]
pub enum ControlMsg {
    /// Start the tunnel client
    Start {
        /// Whether the client ended up running
        response: oneshot::Sender<bool>,
    },
    /// Stop the tunnel client, blocking through the termination windows
    Stop {
        /// Completion notification
        response: oneshot::Sender<()>,
    },
    /// Restart the tunnel client (stop, settle, start)
    Restart {
        /// Whether the client ended up running
        response: oneshot::Sender<bool>,
    },
    /// Kill an externally supplied PID if it matches the recorded one
    KillRecordedPid {
        /// PID supplied by the operator
        pid: u32,
        /// Whether the kill was issued
        response: oneshot::Sender<bool>,
    },
    /// Tear the supervisor down (stop the child and terminate the task)
    Shutdown,
}

/// Handle for controlling a supervisor instance
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    /// Tunnel specification
    pub spec: TunnelSpec,
    /// Channel for sending control messages
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    /// Receiver for state updates
    state_rx: watch::Receiver<SupervisorState>,
}

impl SupervisorHandle {
    /// Send a control message to the supervisor task
    fn send(&self, msg: ControlMsg) -> Result<()> {
        self.control_tx
            .send(msg)
            .map_err(|_| CoreError::SupervisorError("Supervisor task has shut down".to_string()))
    }

    /// Start the tunnel client
    ///
    /// Returns `true` when the client is running afterwards (including the
    /// already-running no-op case) and `false` when validation or the
    /// spawn failed; failures are logged by the task, never thrown.
    pub async fn start(&self) -> Result<bool> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ControlMsg::Start {
            response: response_tx,
        })?;
        response_rx
            .await
            .map_err(|_| CoreError::SupervisorError("No response from supervisor task".to_string()))
    }

    /// Stop the tunnel client
    ///
    /// Blocks through the graceful and forced termination windows (about
    /// five seconds worst case with default knobs) before returning. The
    /// in-memory state is `Stopped` afterwards even when the termination
    /// could not be verified.
    pub async fn stop(&self) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ControlMsg::Stop {
            response: response_tx,
        })?;
        response_rx
            .await
            .map_err(|_| CoreError::SupervisorError("No response from supervisor task".to_string()))
    }

    /// Restart the tunnel client
    ///
    /// Stop, a settle delay so the OS releases ports and files after a
    /// forced kill, then start.
    pub async fn restart(&self) -> Result<bool> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ControlMsg::Restart {
            response: response_tx,
        })?;
        response_rx
            .await
            .map_err(|_| CoreError::SupervisorError("No response from supervisor task".to_string()))
    }

    /// Kill an externally supplied PID if it matches the recorded one
    ///
    /// The PID comes from a human operator confirming a crash-recovery
    /// prompt; requiring it to match the registry prevents killing an
    /// unrelated process that has since reused the PID.
    pub async fn kill_by_recorded_pid(&self, pid: u32) -> Result<bool> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ControlMsg::KillRecordedPid {
            pid,
            response: response_tx,
        })?;
        response_rx
            .await
            .map_err(|_| CoreError::SupervisorError("No response from supervisor task".to_string()))
    }

    /// Tear the supervisor down
    ///
    /// The host is contractually required to invoke this before process
    /// exit; there is no implicit runtime shutdown hook.
    pub fn shutdown(&self) -> Result<()> {
        self.send(ControlMsg::Shutdown)
    }

    /// Get the last-known state without probing the OS
    pub fn status(&self) -> SupervisorState {
        *self.state_rx.borrow()
    }

    /// Convenience check for a live child
    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Subscribe to state changes
    pub fn subscribe_to_state(&self) -> watch::Receiver<SupervisorState> {
        self.state_rx.clone()
    }
}

/// Configuration for spawning a supervisor
pub struct SupervisorConfig {
    /// Tunnel specification
    pub spec: TunnelSpec,
    /// Process adapter for spawning and managing the child
    pub process_adapter: Arc<dyn ProcessAdapter>,
    /// PID registry shared with crash recovery
    pub registry: Arc<PidRegistry>,
    /// Event broadcaster for lifecycle events
    pub event_tx: broadcast::Sender<TunnelEvent>,
}

/// Spawn a supervisor for the given tunnel specification
///
/// Creates the tokio task that manages the process lifecycle and returns
/// a [`SupervisorHandle`] for controlling it.
pub fn spawn_supervisor(config: SupervisorConfig) -> SupervisorHandle {
    let SupervisorConfig {
        spec,
        process_adapter,
        registry,
        event_tx,
    } = config;

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(SupervisorState::Stopped);

    info!("Spawning supervisor for '{}'", spec.name);

    let handle_spec = spec.clone();
    let name = spec.name.clone();
    tokio::spawn(async move {
        let mut supervisor =
            ProcessSupervisor::new(spec, process_adapter, registry, event_tx, state_tx);

        if let Err(e) = supervisor.run(control_rx).await {
            error!("Supervisor task for '{}' failed: {}", name, e);
        }

        info!("Supervisor task for '{}' terminated", name);
    });

    SupervisorHandle {
        spec: handle_spec,
        control_tx,
        state_rx,
    }
}
