//! Process adapters for abstracting process management
//!
//! The supervisor drives children through the [`ProcessAdapter`] and
//! [`ManagedProcess`] traits so the lifecycle state machine can be tested
//! against a mock implementation and the platform plumbing stays behind
//! one seam.

use crate::{process, Result};
use async_trait::async_trait;
use schema::{ProcessExit, TunnelEvent, TunnelSpec};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::debug;

/// Trait for spawning managed processes in a platform-agnostic way
#[async_trait]
pub trait ProcessAdapter: Send + Sync {
    /// Spawn a new managed process according to the tunnel specification
    async fn spawn(&self, spec: &TunnelSpec) -> Result<Box<dyn ManagedProcess>>;
}

/// Trait representing a spawned process that can be controlled and observed
#[async_trait]
pub trait ManagedProcess: Send + Sync {
    /// Get the process ID
    fn pid(&self) -> u32;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessExit>;

    /// Request graceful termination
    async fn terminate(&mut self) -> Result<()>;

    /// Kill the process forcefully
    async fn kill(&mut self) -> Result<()>;

    /// Take a readable handle to the child's stdout for async consumption.
    /// Returns None if stdout was not piped or already taken.
    fn take_stdout(&mut self) -> Option<Pin<Box<dyn AsyncRead + Send + Unpin>>>;

    /// Take a readable handle to the child's stderr for async consumption.
    /// Returns None if stderr was not piped or already taken.
    fn take_stderr(&mut self) -> Option<Pin<Box<dyn AsyncRead + Send + Unpin>>>;
}

/// Process adapter backed by the platform plumbing in [`crate::process`]
#[derive(Copy, Clone, Debug, Default)]
pub struct NativeProcessAdapter;

impl NativeProcessAdapter {
    /// Create a new native process adapter
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessAdapter for NativeProcessAdapter {
    async fn spawn(&self, spec: &TunnelSpec) -> Result<Box<dyn ManagedProcess>> {
        debug!("Spawning tunnel client: {} {:?}", spec.executable.display(), spec.argv());
        let child = process::spawn(&spec.executable, &spec.argv(), &spec.data_dir)?;
        Ok(Box::new(NativeManagedProcess { child }))
    }
}

/// Managed process wrapping a platform [`process::ChildProcess`]
struct NativeManagedProcess {
    child: process::ChildProcess,
}

#[async_trait]
impl ManagedProcess for NativeManagedProcess {
    fn pid(&self) -> u32 {
        self.child.pid()
    }

    async fn wait(&mut self) -> Result<ProcessExit> {
        let exit_status = self.child.wait().await?;

        let (exit_code, signal) = if let Some(code) = exit_status.code() {
            (Some(code), None)
        } else {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                (None, exit_status.signal())
            }
            #[cfg(not(unix))]
            {
                (None, None)
            }
        };

        Ok(ProcessExit {
            pid: self.pid(),
            exit_code,
            signal,
            timestamp: TunnelEvent::current_timestamp(),
        })
    }

    async fn terminate(&mut self) -> Result<()> {
        self.child.terminate()
    }

    async fn kill(&mut self) -> Result<()> {
        self.child.kill()
    }

    fn take_stdout(&mut self) -> Option<Pin<Box<dyn AsyncRead + Send + Unpin>>> {
        self.child.take_stdout().map(|s| {
            let r: Pin<Box<dyn AsyncRead + Send + Unpin>> = Box::pin(s);
            r
        })
    }

    fn take_stderr(&mut self) -> Option<Pin<Box<dyn AsyncRead + Send + Unpin>>> {
        self.child.take_stderr().map(|s| {
            let r: Pin<Box<dyn AsyncRead + Send + Unpin>> = Box::pin(s);
            r
        })
    }
}

/// Mock process adapter for testing
#[derive(Debug, Clone)]
pub struct MockProcessAdapter {
    /// Behavior instructions for successively spawned processes
    instructions: Arc<tokio::sync::Mutex<Vec<MockInstruction>>>,
}

/// Instructions for mock process behavior
#[derive(Debug, Clone, Copy)]
pub struct MockInstruction {
    /// How long to wait before the process "exits" on its own
    pub exit_delay: std::time::Duration,
    /// Exit code to return (None means killed by signal)
    pub exit_code: Option<i32>,
    /// Signal that killed the process
    pub signal: Option<i32>,
    /// Whether terminate/kill take effect; a stubborn process ignores both
    pub responds_to_signals: bool,
}

impl Default for MockInstruction {
    fn default() -> Self {
        Self {
            exit_delay: std::time::Duration::from_millis(100),
            exit_code: Some(0),
            signal: None,
            responds_to_signals: true,
        }
    }
}

impl MockProcessAdapter {
    /// Create a new mock adapter with no pre-configured instructions
    pub fn new() -> Self {
        Self {
            instructions: Arc::new(tokio::sync::Mutex::new(vec![])),
        }
    }

    /// Add instructions for the next spawned process
    pub async fn add_instruction(&self, instruction: MockInstruction) {
        let mut instructions = self.instructions.lock().await;
        instructions.push(instruction);
    }

    /// A mock whose processes run until signalled
    pub async fn long_running() -> Self {
        let adapter = Self::new();
        adapter
            .add_instruction(MockInstruction {
                exit_delay: std::time::Duration::from_secs(3600),
                ..Default::default()
            })
            .await;
        adapter
    }

    /// A mock whose processes ignore both termination signals
    pub async fn stubborn() -> Self {
        let adapter = Self::new();
        adapter
            .add_instruction(MockInstruction {
                exit_delay: std::time::Duration::from_secs(3600),
                responds_to_signals: false,
                ..Default::default()
            })
            .await;
        adapter
    }
}

impl Default for MockProcessAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessAdapter for MockProcessAdapter {
    async fn spawn(&self, spec: &TunnelSpec) -> Result<Box<dyn ManagedProcess>> {
        debug!("Spawning mock process for: {} {:?}", spec.executable.display(), spec.argv());

        let mut instructions = self.instructions.lock().await;
        let instruction = if instructions.is_empty() {
            MockInstruction::default()
        } else {
            instructions.remove(0)
        };

        let pid = next_mock_pid();
        Ok(Box::new(MockManagedProcess::new(pid, instruction)))
    }
}

/// Deterministic fake PIDs for mock processes, kept far above real ranges
fn next_mock_pid() -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};
    static NEXT: AtomicU32 = AtomicU32::new(1_000_000);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Mock managed process for testing
struct MockManagedProcess {
    pid: u32,
    instruction: MockInstruction,
    started_at: std::time::Instant,
    terminated: bool,
    killed: bool,
}

impl MockManagedProcess {
    fn new(pid: u32, instruction: MockInstruction) -> Self {
        Self {
            pid,
            instruction,
            started_at: std::time::Instant::now(),
            terminated: false,
            killed: false,
        }
    }

    fn should_exit(&self) -> bool {
        if self.instruction.responds_to_signals && (self.killed || self.terminated) {
            return true;
        }
        self.started_at.elapsed() >= self.instruction.exit_delay
    }

    fn create_exit(&self) -> ProcessExit {
        let (exit_code, signal) = if self.instruction.responds_to_signals && self.killed {
            (None, Some(9))
        } else if self.instruction.responds_to_signals && self.terminated {
            (None, Some(15))
        } else {
            (self.instruction.exit_code, self.instruction.signal)
        };

        ProcessExit {
            pid: self.pid,
            exit_code,
            signal,
            timestamp: TunnelEvent::current_timestamp(),
        }
    }
}

#[async_trait]
impl ManagedProcess for MockManagedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait(&mut self) -> Result<ProcessExit> {
        while !self.should_exit() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        Ok(self.create_exit())
    }

    async fn terminate(&mut self) -> Result<()> {
        debug!("Terminating mock process {}", self.pid);
        self.terminated = true;
        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        debug!("Killing mock process {}", self.pid);
        self.killed = true;
        Ok(())
    }

    fn take_stdout(&mut self) -> Option<Pin<Box<dyn AsyncRead + Send + Unpin>>> {
        None
    }

    fn take_stderr(&mut self) -> Option<Pin<Box<dyn AsyncRead + Send + Unpin>>> {
        None
    }
}
