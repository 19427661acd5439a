//! Event system for the frpwarden supervisor
//!
//! This module defines the events emitted by the supervisor to provide
//! observability into state changes and process lifecycle. Events are
//! serializable so they can be logged to structured sinks or broadcast to
//! multiple subscribers via event channels.

use crate::tunnel::{ProcessExit, SupervisorState};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Events emitted by the supervisor
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum TunnelEvent {
    /// Supervisor state has changed
    StateChanged {
        /// Logical process name
        name: String,
        /// Previous state
        from_state: SupervisorState,
        /// New state
        to_state: SupervisorState,
        /// Event timestamp in RFC3339 format
        timestamp: String,
        /// Optional reason for the state change
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// The child process has started
    ProcessStarted {
        /// Logical process name
        name: String,
        /// Process ID of the spawned child
        pid: u32,
        /// Event timestamp in RFC3339 format
        timestamp: String,
        /// Command that was executed
        command: String,
        /// Arguments passed to the command
        args: Vec<String>,
    },

    /// The child process has exited
    ProcessExited {
        /// Logical process name
        name: String,
        /// Exit information
        exit: ProcessExit,
    },

    /// Incompatible entries were stripped from the tunnel configuration
    ConfigSanitized {
        /// Logical process name
        name: String,
        /// Event timestamp in RFC3339 format
        timestamp: String,
        /// Number of lines removed
        removed_lines: u32,
    },

    /// The public tunnel endpoint was read from the configuration
    EndpointResolved {
        /// Logical process name
        name: String,
        /// Event timestamp in RFC3339 format
        timestamp: String,
        /// Remote server address
        server_addr: String,
        /// Remote port the tunnel is exposed on
        remote_port: i64,
    },

    /// A warning condition has occurred
    Warning {
        /// Logical process name
        name: String,
        /// Warning message
        message: String,
        /// Event timestamp in RFC3339 format
        timestamp: String,
        /// Optional warning code for categorization
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl TunnelEvent {
    /// Get the logical process name for this event
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::StateChanged { name, .. }
            | Self::ProcessStarted { name, .. }
            | Self::ProcessExited { name, .. }
            | Self::ConfigSanitized { name, .. }
            | Self::EndpointResolved { name, .. }
            | Self::Warning { name, .. } => name,
        }
    }

    /// Create a current timestamp string in RFC3339 format (seconds precision)
    #[must_use]
    pub fn current_timestamp() -> String {
        humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
    }

    /// Create a state changed event
    #[must_use]
    pub fn state_changed(
        name: String,
        from_state: SupervisorState,
        to_state: SupervisorState,
        reason: Option<String>,
    ) -> Self {
        Self::StateChanged {
            name,
            from_state,
            to_state,
            timestamp: Self::current_timestamp(),
            reason,
        }
    }

    /// Create a process started event
    #[must_use]
    pub fn process_started(name: String, pid: u32, command: String, args: Vec<String>) -> Self {
        Self::ProcessStarted {
            name,
            pid,
            timestamp: Self::current_timestamp(),
            command,
            args,
        }
    }

    /// Create a process exited event
    #[must_use]
    pub fn process_exited(name: String, exit: ProcessExit) -> Self {
        Self::ProcessExited { name, exit }
    }

    /// Create a warning event
    #[must_use]
    pub fn warning(name: String, message: String, code: Option<String>) -> Self {
        Self::Warning {
            name,
            message,
            timestamp: Self::current_timestamp(),
            code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_rfc3339_seconds() {
        let ts = TunnelEvent::current_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
    }

    #[test]
    fn event_name_accessor() {
        let event = TunnelEvent::process_started(
            "frpc".to_string(),
            1234,
            "/srv/frpc".to_string(),
            vec!["-c".to_string()],
        );
        assert_eq!(event.name(), "frpc");
    }

    #[test]
    fn state_changed_round_trips_through_json() {
        let event = TunnelEvent::state_changed(
            "frpc".to_string(),
            SupervisorState::Stopped,
            SupervisorState::Starting,
            Some("start requested".to_string()),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"eventType\":\"stateChanged\""));
        assert!(json.contains("\"fromState\":\"stopped\""));
        let back: TunnelEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let event = TunnelEvent::warning("frpc".to_string(), "oops".to_string(), None);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("\"code\""));
    }
}
