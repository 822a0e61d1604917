//! Error taxonomy for module bring-up and messaging
//!
//! Connectivity faults are unrecoverable in-process: each maps to a
//! [`TerminalAction`] the supervisor performs. Call-level errors (oversized
//! payload, publishing while disconnected) go back to the caller.

use crate::network::NetworkError;
use crate::state::{Link, LinkState};
use crate::system::TerminalAction;
use crate::transport::mqtt::MqttError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for module operations
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Impossible to connect to '{ssid}' within {timeout_ms}ms")]
    JoinTimeout { ssid: String, timeout_ms: u64 },

    #[error("Impossible to connect to '{broker}' within {timeout_ms}ms")]
    ConnectTimeout { broker: String, timeout_ms: u64 },

    #[error("Lost {0} connection")]
    SessionLost(Link),

    #[error("Payload too large: {size} bytes exceeds buffer capacity of {capacity} bytes")]
    PayloadTooLarge { size: usize, capacity: usize },

    #[error("Messaging session not connected - current state: {state:?}")]
    NotConnected { state: LinkState },

    #[error("Periodic tasks already started")]
    AlreadyStarted,

    #[error("Network driver error: {0}")]
    Network(#[from] NetworkError),

    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModuleError {
    /// Create payload too large error
    pub fn payload_too_large(size: usize, capacity: usize) -> Self {
        Self::PayloadTooLarge { size, capacity }
    }

    /// Terminal action implied by this error, `None` for errors the caller handles
    ///
    /// A network that never joins suspends the node for `suspend_for`; every
    /// messaging failure and every post-bring-up loss restarts it.
    pub fn terminal_action(&self, suspend_for: Duration) -> Option<TerminalAction> {
        match self {
            ModuleError::JoinTimeout { .. } | ModuleError::Network(_) => {
                Some(TerminalAction::Suspend(suspend_for))
            }
            ModuleError::ConnectTimeout { .. } | ModuleError::SessionLost(_) => {
                Some(TerminalAction::Restart)
            }
            ModuleError::PayloadTooLarge { .. }
            | ModuleError::NotConnected { .. }
            | ModuleError::AlreadyStarted
            | ModuleError::Transport(_)
            | ModuleError::Serialization(_) => None,
        }
    }

    /// Whether the error ends the running process
    pub fn is_fatal(&self) -> bool {
        self.terminal_action(Duration::ZERO).is_some()
    }
}

/// Result type for module operations
pub type ModuleResult<T> = Result<T, ModuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    const SLEEP: Duration = Duration::from_secs(60);

    #[test]
    fn test_join_timeout_suspends() {
        let error = ModuleError::JoinTimeout {
            ssid: "SailTrack-Net".to_string(),
            timeout_ms: 10_000,
        };
        assert_eq!(
            error.terminal_action(SLEEP),
            Some(TerminalAction::Suspend(SLEEP))
        );
        assert!(error.to_string().contains("SailTrack-Net"));
    }

    #[test]
    fn test_driver_failure_suspends() {
        let error = ModuleError::from(NetworkError::Driver("radio off".to_string()));
        assert_eq!(
            error.terminal_action(SLEEP),
            Some(TerminalAction::Suspend(SLEEP))
        );
    }

    #[test]
    fn test_connect_timeout_restarts() {
        let error = ModuleError::ConnectTimeout {
            broker: "mqtt://mosquitto@192.168.42.1:1883".to_string(),
            timeout_ms: 10_000,
        };
        assert_eq!(error.terminal_action(SLEEP), Some(TerminalAction::Restart));
    }

    #[test]
    fn test_session_loss_restarts_for_both_links() {
        for link in [Link::Network, Link::Messaging] {
            let error = ModuleError::SessionLost(link);
            assert_eq!(error.terminal_action(SLEEP), Some(TerminalAction::Restart));
            assert!(error.is_fatal());
        }
    }

    #[test]
    fn test_call_level_errors_are_not_fatal() {
        let too_large = ModuleError::payload_too_large(600, 512);
        assert!(!too_large.is_fatal());
        assert_eq!(
            too_large.to_string(),
            "Payload too large: 600 bytes exceeds buffer capacity of 512 bytes"
        );

        let not_connected = ModuleError::NotConnected {
            state: LinkState::Lost,
        };
        assert!(!not_connected.is_fatal());
        assert!(!ModuleError::AlreadyStarted.is_fatal());
    }
}
