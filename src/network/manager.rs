//! Bounded network join with loss supervision

use super::NetworkDriver;
use crate::bringup_span;
use crate::callbacks::ModuleCallbacks;
use crate::config::NetworkConfig;
use crate::error::{ModuleError, ModuleResult};
use crate::poll::{poll_until, BRINGUP_POLL_INTERVAL};
use crate::state::{Link, LinkState, LinkStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, Instrument};

/// Owns the network driver for the lifetime of the process
pub struct ConnectivityManager<N: NetworkDriver> {
    driver: N,
    config: NetworkConfig,
    link: Arc<LinkStatus>,
}

impl<N> ConnectivityManager<N>
where
    N: NetworkDriver + 'static,
{
    pub fn new(driver: N, config: NetworkConfig, link: Arc<LinkStatus>) -> Self {
        Self {
            driver,
            config,
            link,
        }
    }

    pub fn link(&self) -> &Arc<LinkStatus> {
        &self.link
    }

    /// Join the configured network, waiting at most `timeout`
    ///
    /// Fires `on_network_join_begin` once the station is configured and
    /// `on_network_join_result` exactly once with the outcome. A failed join is
    /// returned as an error and nothing is retried.
    pub async fn join(
        &mut self,
        callbacks: &dyn ModuleCallbacks,
        timeout: Duration,
    ) -> ModuleResult<()> {
        let span = bringup_span!(stage = "network", ssid = %self.config.ssid);
        async {
            if let Err(e) = self.driver.begin_station(&self.config).await {
                error!(error = %e, "Unable to configure station mode");
                callbacks.on_network_join_result(false);
                return Err(ModuleError::Network(e));
            }

            callbacks.on_network_join_begin();
            info!("Connecting to '{}'...", self.config.ssid);

            let driver = &self.driver;
            let joined = poll_until(timeout, BRINGUP_POLL_INTERVAL, || driver.is_joined()).await;

            if joined {
                self.link.advance(LinkState::Connected);
            }
            callbacks.on_network_join_result(joined);

            if !joined {
                error!("Impossible to connect to '{}'", self.config.ssid);
                return Err(ModuleError::JoinTimeout {
                    ssid: self.config.ssid.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }

            info!("Successfully connected to '{}'!", self.config.ssid);
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Hand the driver to a background task that reports the first disconnect
    ///
    /// Loss fires `on_network_lost` and sends [`ModuleError::SessionLost`] to the
    /// supervisor; there is no reconnect path.
    pub fn watch_for_loss(
        self,
        callbacks: Arc<dyn ModuleCallbacks>,
        fatal_tx: mpsc::Sender<ModuleError>,
    ) -> JoinHandle<()> {
        let Self {
            mut driver,
            config,
            link,
        } = self;

        tokio::spawn(async move {
            driver.wait_for_disconnect().await;

            link.advance(LinkState::Lost);
            callbacks.on_network_lost();
            error!("Lost connection to '{}'", config.ssid);

            let _ = fatal_tx.send(ModuleError::SessionLost(Link::Network)).await;
        })
    }
}
