//! Platform process plumbing for the frpwarden core
//!
//! This module provides the OS-specific pieces the supervisor composes:
//! spawning the tunnel client with piped output, signalling it for graceful
//! and forced termination, probing an arbitrary PID for liveness, and the
//! one-shot kill commands used for orphan cleanup.
//!
//! ## Platform Support
//!
//! - **Unix**: process groups via `setsid()`, SIGTERM/SIGKILL signalling,
//!   zero-signal liveness probe
//! - **Windows**: `TerminateProcess` via the child handle, `tasklist`
//!   PID+image enumeration for liveness, `taskkill` for one-shot and
//!   image-wide kills

#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::*;

#[cfg(windows)]
pub mod windows;

#[cfg(windows)]
pub use windows::*;
