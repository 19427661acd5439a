//! Core error types and utilities

use std::path::PathBuf;
use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Executable not found: {0}")]
    MissingExecutable(PathBuf),

    #[error("Configuration file not found: {0}")]
    MissingConfig(PathBuf),

    #[error("Spawn failure: {0}")]
    SpawnFailure(String),

    #[error("Termination unconfirmed for pid {0}")]
    TerminationUnconfirmed(u32),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Probe failure: {0}")]
    ProbeFailure(String),

    #[error("Supervisor error: {0}")]
    SupervisorError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl CoreError {
    /// Get the stable error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::MissingExecutable(_) => "CORE001",
            CoreError::MissingConfig(_) => "CORE002",
            CoreError::SpawnFailure(_) => "CORE003",
            CoreError::TerminationUnconfirmed(_) => "CORE004",
            CoreError::PersistenceFailure(_) => "CORE005",
            CoreError::ProbeFailure(_) => "CORE006",
            CoreError::SupervisorError(_) => "CORE007",
            CoreError::Io(_) => "CORE008",
            CoreError::TomlParse(_) => "CORE009",
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            CoreError::MissingExecutable(PathBuf::from("/x/frpc")).code(),
            "CORE001"
        );
        assert_eq!(CoreError::TerminationUnconfirmed(42).code(), "CORE004");
        assert_eq!(
            CoreError::PersistenceFailure("disk full".to_string()).code(),
            "CORE005"
        );
    }

    #[test]
    fn error_display() {
        let error = CoreError::MissingConfig(PathBuf::from("/srv/frpc.toml"));
        assert_eq!(
            error.to_string(),
            "Configuration file not found: /srv/frpc.toml"
        );
        let error = CoreError::TerminationUnconfirmed(4321);
        assert_eq!(error.to_string(), "Termination unconfirmed for pid 4321");
    }
}
