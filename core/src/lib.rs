//! Core functionality for the frpwarden project
//!
//! This crate contains the process supervision subsystem for the
//! reverse-tunnel client: lifecycle control, PID persistence with
//! staleness detection, cross-platform termination, output relaying, and
//! crash-recovery coordination. The host consumes it through
//! [`supervisor::SupervisorHandle`] and
//! [`recovery::CrashRecoveryCoordinator`].

pub mod config;
pub mod error;
pub mod process;
pub mod recovery;
pub mod registry;
pub mod relay;
pub mod supervisor;
pub mod terminate;

// Re-export schema types for convenience
pub use schema::*;

pub use error::{CoreError, Result};
pub use registry::PidRegistry;
pub use terminate::{TerminationOutcome, Terminator};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| crate::CoreError::SupervisorError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
