//! Remote update hooks
//!
//! The binary transfer itself belongs to the platform. The module only services
//! the handler periodically and reacts to its lifecycle events; in particular a
//! starting update stops the messaging session before the handler runs again.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTarget {
    Firmware,
    Filesystem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error("Auth Failed")]
    Auth,
    #[error("Begin Failed")]
    Begin,
    #[error("Connect Failed")]
    Connect,
    #[error("Receive Failed")]
    Receive,
    #[error("End Failed")]
    End,
}

impl UpdateError {
    /// Numeric code reported alongside the message
    pub fn code(self) -> u8 {
        match self {
            UpdateError::Auth => 0,
            UpdateError::Begin => 1,
            UpdateError::Connect => 2,
            UpdateError::Receive => 3,
            UpdateError::End => 4,
        }
    }
}

/// What happened since the previous poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateEvent {
    Idle,
    Started(UpdateTarget),
    Progress { done: u64, total: u64 },
    Completed,
    Failed(UpdateError),
}

/// Platform remote-update service
#[async_trait]
pub trait UpdateHandler: Send {
    /// Advertise the update service under `hostname`
    async fn begin(&mut self, _hostname: &str) -> Result<(), UpdateError> {
        Ok(())
    }

    /// Service pending protocol steps
    async fn poll(&mut self) -> UpdateEvent;
}

/// Integer percentage of `done` over `total`, 0 when the total is unknown
pub fn progress_percent(done: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    let percent = u128::from(done.min(total)) * 100 / u128::from(total);
    percent as u64
}
