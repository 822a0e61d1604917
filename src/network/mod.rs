//! Wireless network join and loss detection
//!
//! The platform radio stack sits behind [`NetworkDriver`]. [`ConnectivityManager`]
//! drives it through the bounded join and then watches for loss.

pub mod manager;

pub use manager::ConnectivityManager;

use crate::config::NetworkConfig;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Station configuration rejected: {0}")]
    Configuration(String),
    #[error("Network driver failure: {0}")]
    Driver(String),
}

/// Station-mode network stack provided by the platform
#[async_trait]
pub trait NetworkDriver: Send + Sync {
    /// Apply hostname/addressing and start joining `config.ssid`
    async fn begin_station(&mut self, config: &NetworkConfig) -> Result<(), NetworkError>;

    /// Current join status
    fn is_joined(&self) -> bool;

    /// Resolve once the station drops off the network
    async fn wait_for_disconnect(&mut self);
}

/// [`NetworkDriver`] for hosted processes whose link is owned by the OS
///
/// Joining succeeds immediately and loss is never reported; a host that loses
/// its link shows up as a messaging loss instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostNetwork;

#[async_trait]
impl NetworkDriver for HostNetwork {
    async fn begin_station(&mut self, config: &NetworkConfig) -> Result<(), NetworkError> {
        info!(
            hostname = %config.hostname,
            "Network managed by host OS, skipping station setup"
        );
        Ok(())
    }

    fn is_joined(&self) -> bool {
        true
    }

    async fn wait_for_disconnect(&mut self) {
        std::future::pending::<()>().await
    }
}
