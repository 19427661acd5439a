//! Supervisor task implementation
//!
//! This module contains the [`ProcessSupervisor`], the task-side state
//! machine behind [`super::SupervisorHandle`]. Control messages arrive on
//! an unbounded channel and are handled one at a time; in parallel the
//! task waits on the live child so an exit on the child's own initiative
//! is observed and cleaned up.

use super::{ControlMsg, ManagedProcess, ProcessAdapter};
use crate::registry::PidRegistry;
use crate::terminate::{TerminationOutcome, Terminator};
use crate::{config, relay, CoreError, Result};
use schema::{ProcessExit, SupervisorState, TunnelEvent, TunnelSpec};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Whether the task keeps running after a control message
enum Flow {
    Continue,
    Shutdown,
}

/// Supervisor task managing the lifecycle of the tunnel client
pub struct ProcessSupervisor {
    /// Tunnel specification
    spec: TunnelSpec,
    /// Current state
    state: SupervisorState,
    /// Process adapter for spawning and managing the child
    adapter: Arc<dyn ProcessAdapter>,
    /// PID registry, written on start and cleared on confirmed stop/exit
    registry: Arc<PidRegistry>,
    /// Event broadcaster
    event_tx: broadcast::Sender<TunnelEvent>,
    /// State broadcaster
    state_tx: watch::Sender<SupervisorState>,
    /// Kill escalation strategy
    terminator: Terminator,
    /// Currently managed child (if any); exclusively owned here
    current: Option<Box<dyn ManagedProcess>>,
    /// Output relay task for the current child
    relay_task: Option<tokio::task::JoinHandle<()>>,
}

impl ProcessSupervisor {
    /// Create a new supervisor task state
    pub fn new(
        spec: TunnelSpec,
        adapter: Arc<dyn ProcessAdapter>,
        registry: Arc<PidRegistry>,
        event_tx: broadcast::Sender<TunnelEvent>,
        state_tx: watch::Sender<SupervisorState>,
    ) -> Self {
        let terminator = Terminator::for_spec(&spec);
        Self {
            spec,
            state: SupervisorState::Stopped,
            adapter,
            registry,
            event_tx,
            state_tx,
            terminator,
            current: None,
            relay_task: None,
        }
    }

    /// Run the supervisor task loop
    pub async fn run(&mut self, mut control_rx: mpsc::UnboundedReceiver<ControlMsg>) -> Result<()> {
        info!("Starting supervisor for '{}'", self.spec.name);

        loop {
            tokio::select! {
                msg = control_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            debug!("Received control message: {:?}", msg);
                            if matches!(self.handle_control_message(msg).await, Flow::Shutdown) {
                                break;
                            }
                        }
                        None => {
                            info!("Control channel closed, shutting down supervisor");
                            break;
                        }
                    }
                }

                exit = self.wait_for_process_exit(), if self.current.is_some() => {
                    self.handle_process_exit(exit).await;
                }
            }
        }

        // Teardown: never leave a child behind
        if self.current.is_some() {
            self.stop_tunnel().await;
        }

        Ok(())
    }

    /// Handle a control message
    async fn handle_control_message(&mut self, msg: ControlMsg) -> Flow {
        match msg {
            ControlMsg::Start { response } => {
                let running = self.start_tunnel().await;
                let _ = response.send(running);
            }
            ControlMsg::Stop { response } => {
                self.stop_tunnel().await;
                let _ = response.send(());
            }
            ControlMsg::Restart { response } => {
                info!("Restarting '{}'", self.spec.name);
                self.stop_tunnel().await;
                // The OS may not release bound ports/files instantly after
                // a forced kill
                sleep(self.spec.settle_delay()).await;
                let running = self.start_tunnel().await;
                let _ = response.send(running);
            }
            ControlMsg::KillRecordedPid { pid, response } => {
                let _ = response.send(self.kill_recorded_pid(pid));
            }
            ControlMsg::Shutdown => {
                info!("Shutdown requested for '{}'", self.spec.name);
                if self.current.is_some() {
                    self.stop_tunnel().await;
                }
                return Flow::Shutdown;
            }
        }
        Flow::Continue
    }

    /// Start the tunnel client
    ///
    /// Returns whether the client is running when the call completes.
    async fn start_tunnel(&mut self) -> bool {
        match self.state {
            SupervisorState::Running => {
                info!("'{}' is already running", self.spec.name);
                return true;
            }
            SupervisorState::Stopped => {}
            other => {
                warn!("Cannot start '{}' in state {:?}", self.spec.name, other);
                return false;
            }
        }

        if !self.spec.executable.exists() {
            let err = CoreError::MissingExecutable(self.spec.executable.clone());
            error!("Cannot start '{}': {}", self.spec.name, err);
            self.emit(TunnelEvent::warning(
                self.spec.name.clone(),
                err.to_string(),
                Some(err.code().to_string()),
            ));
            return false;
        }
        if !self.spec.config_path.exists() {
            let err = CoreError::MissingConfig(self.spec.config_path.clone());
            error!("Cannot start '{}': {}", self.spec.name, err);
            self.emit(TunnelEvent::warning(
                self.spec.name.clone(),
                err.to_string(),
                Some(err.code().to_string()),
            ));
            return false;
        }

        // Best-effort compatibility patch, applied on every start
        match config::sanitize_config(&self.spec.config_path) {
            Ok(0) => {}
            Ok(removed) => {
                self.emit(TunnelEvent::ConfigSanitized {
                    name: self.spec.name.clone(),
                    timestamp: TunnelEvent::current_timestamp(),
                    removed_lines: removed as u32,
                });
            }
            Err(e) => {
                warn!("Config preprocessing for '{}' failed: {}", self.spec.name, e);
            }
        }

        self.transition(SupervisorState::Starting, Some("Start requested".to_string()));

        match self.adapter.spawn(&self.spec).await {
            Ok(mut process) => {
                let pid = process.pid();
                self.emit(TunnelEvent::process_started(
                    self.spec.name.clone(),
                    pid,
                    self.spec.executable.display().to_string(),
                    self.spec.argv(),
                ));

                // A failed registration leaves the child running; killing a
                // healthy child over a bookkeeping gap would be worse
                if let Err(e) = self.registry.record(&self.spec.name, pid) {
                    warn!(
                        "'{}' (pid {}) is running but pid registration failed: {}",
                        self.spec.name, pid, e
                    );
                }

                let stdout = process.take_stdout();
                let stderr = process.take_stderr();
                self.relay_task = Some(relay::spawn_relay(&self.spec.name, stdout, stderr));
                self.current = Some(process);

                self.transition(SupervisorState::Running, Some("Spawn succeeded".to_string()));
                info!("'{}' started with pid {}", self.spec.name, pid);
                self.announce_endpoint();
                true
            }
            Err(e) => {
                error!("Failed to start '{}': {}", self.spec.name, e);
                self.transition(SupervisorState::Stopped, Some("Spawn failed".to_string()));
                false
            }
        }
    }

    /// Stop the tunnel client, escalating as needed
    ///
    /// Always ends in `Stopped` with the PID record cleared, even when the
    /// termination could not be verified; a consistent stopped state beats
    /// blocking indefinitely.
    async fn stop_tunnel(&mut self) {
        let Some(mut process) = self.current.take() else {
            debug!("'{}' is not running", self.spec.name);
            return;
        };
        let pid = process.pid();

        self.transition(SupervisorState::Stopping, Some("Stop requested".to_string()));
        if let Some(handle) = self.relay_task.take() {
            handle.abort();
        }

        match self.terminator.terminate(process.as_mut()).await {
            TerminationOutcome::Graceful(exit) | TerminationOutcome::Forced(exit) => {
                info!(
                    "'{}' stopped (exit code: {:?}, signal: {:?})",
                    self.spec.name, exit.exit_code, exit.signal
                );
                self.emit(TunnelEvent::process_exited(self.spec.name.clone(), exit));
            }
            TerminationOutcome::Unconfirmed => {
                let err = CoreError::TerminationUnconfirmed(pid);
                warn!("{}; manual cleanup may be required", err);
                #[cfg(windows)]
                {
                    // PID-based kills are unreliable for console children
                    // on Windows; fall back to killing by image name
                    let image = schema::executable_name(&self.spec.name);
                    if self.terminator.kill_all_by_name(&image) {
                        info!("Issued broad kill for image '{}'", image);
                    } else {
                        warn!("Broad kill for image '{}' failed", image);
                    }
                }
                self.emit(TunnelEvent::warning(
                    self.spec.name.clone(),
                    err.to_string(),
                    Some(err.code().to_string()),
                ));
            }
        }

        if let Err(e) = self.registry.clear(&self.spec.name) {
            warn!("Failed to clear pid record for '{}': {}", self.spec.name, e);
        }
        self.transition(SupervisorState::Stopped, Some("Stop completed".to_string()));
    }

    /// Kill an externally supplied PID if it matches the registry
    fn kill_recorded_pid(&mut self, pid: u32) -> bool {
        match self.registry.check(&self.spec.name) {
            Some(recorded) if recorded == pid => {
                info!("Killing recorded process '{}' (pid {})", self.spec.name, pid);
                let killed = self.terminator.kill_by_pid(pid);
                if killed {
                    if let Err(e) = self.registry.clear(&self.spec.name) {
                        warn!("Failed to clear pid record for '{}': {}", self.spec.name, e);
                    }
                    info!("Killed process '{}' (pid {})", self.spec.name, pid);
                } else {
                    warn!("Could not kill process '{}' (pid {})", self.spec.name, pid);
                }
                killed
            }
            _ => {
                warn!(
                    "Pid {} does not match the recorded pid for '{}'",
                    pid, self.spec.name
                );
                false
            }
        }
    }

    /// Wait for the current child to exit
    async fn wait_for_process_exit(&mut self) -> Result<ProcessExit> {
        if let Some(ref mut process) = self.current {
            process.wait().await
        } else {
            // Only reachable when polled without a child; the select guard
            // prevents that
            Err(CoreError::SupervisorError("No process to wait for".to_string()))
        }
    }

    /// Handle the child exiting on its own initiative
    ///
    /// This is the only path that transitions to `Stopped` outside an
    /// explicit stop; it models the child crashing or terminating itself.
    async fn handle_process_exit(&mut self, exit: Result<ProcessExit>) {
        self.current = None;
        // The relay drains the remaining output and ends at EOF on its own
        self.relay_task.take();

        match exit {
            Ok(exit) => {
                // The code is recorded, not interpreted; this layer does
                // not distinguish a crash from a normal stop
                info!(
                    "'{}' process {} exited (exit code: {:?}, signal: {:?})",
                    self.spec.name, exit.pid, exit.exit_code, exit.signal
                );
                self.emit(TunnelEvent::process_exited(self.spec.name.clone(), exit));
            }
            Err(e) => {
                error!("Error waiting for '{}' child: {}", self.spec.name, e);
            }
        }

        if let Err(e) = self.registry.clear(&self.spec.name) {
            warn!("Failed to clear pid record for '{}': {}", self.spec.name, e);
        }
        self.transition(SupervisorState::Stopped, Some("Process exited".to_string()));
    }

    /// Announce the public endpoint named by the tunnel configuration
    fn announce_endpoint(&self) {
        match config::resolve_endpoint(&self.spec.config_path) {
            Ok(Some(endpoint)) => {
                info!(
                    "Public tunnel address: {}:{}",
                    endpoint.server_addr, endpoint.remote_port
                );
                self.emit(TunnelEvent::EndpointResolved {
                    name: self.spec.name.clone(),
                    timestamp: TunnelEvent::current_timestamp(),
                    server_addr: endpoint.server_addr,
                    remote_port: endpoint.remote_port,
                });
            }
            Ok(None) => {
                debug!("No public endpoint info in {}", self.spec.config_path.display());
            }
            Err(e) => {
                warn!("Failed to read endpoint info for '{}': {}", self.spec.name, e);
            }
        }
    }

    /// Transition to a new state and publish it
    fn transition(&mut self, new_state: SupervisorState, reason: Option<String>) {
        if self.state == new_state {
            return;
        }

        let old_state = self.state;
        self.state = new_state;

        debug!(
            "'{}' transitioning from {:?} to {:?}",
            self.spec.name, old_state, new_state
        );

        if self.state_tx.send(new_state).is_err() {
            debug!("No state subscribers for '{}'", self.spec.name);
        }

        self.emit(TunnelEvent::state_changed(
            self.spec.name.clone(),
            old_state,
            new_state,
            reason,
        ));
    }

    /// Emit an event, best-effort
    fn emit(&self, event: TunnelEvent) {
        let _ = self.event_tx.send(event);
    }
}
