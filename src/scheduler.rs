//! Periodic background tasks started once messaging is up
//!
//! Each task is an independent loop on its own interval; nothing orders them
//! relative to each other. The one ordering that matters is inside the update
//! task: a starting update stops the messaging session before the update
//! handler is polled again.

use crate::callbacks::ModuleCallbacks;
use crate::config::EffectiveConfig;
use crate::error::{ModuleError, ModuleResult};
use crate::messaging::MessagingClient;
use crate::protocol::TopicBuilder;
use crate::transport::Transport;
use crate::update::{progress_percent, UpdateEvent, UpdateHandler, UpdateTarget};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Owns the periodic task handles
#[derive(Debug, Default)]
pub struct BackgroundScheduler {
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl BackgroundScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Start the status, log and update-poll tasks; only the first call succeeds
    pub fn start<T>(
        &self,
        config: &EffectiveConfig,
        messaging: Arc<MessagingClient<T>>,
        callbacks: Arc<dyn ModuleCallbacks>,
        updater: Option<Box<dyn UpdateHandler>>,
    ) -> ModuleResult<()>
    where
        T: Transport + 'static,
    {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ModuleError::AlreadyStarted);
        }

        let mut handles = vec![
            Self::spawn_status_task(
                TopicBuilder::build_status_topic(&config.identity.name),
                config.rates.status_period(),
                messaging.clone(),
                callbacks,
            ),
            Self::spawn_log_task(config.rates.log_period(), messaging.clone()),
        ];

        if let Some(updater) = updater {
            handles.push(Self::spawn_update_task(
                config.identity.hostname.clone(),
                config.rates.update_period(),
                messaging,
                updater,
            ));
        }

        info!(tasks = handles.len(), "Periodic tasks started");
        if let Ok(mut slot) = self.handles.lock() {
            slot.extend(handles);
        }
        Ok(())
    }

    /// Abort every periodic task
    pub fn shutdown(&self) {
        if let Ok(mut slot) = self.handles.lock() {
            for handle in slot.drain(..) {
                handle.abort();
            }
        }
    }

    fn spawn_status_task<T>(
        topic: String,
        period: Duration,
        messaging: Arc<MessagingClient<T>>,
        callbacks: Arc<dyn ModuleCallbacks>,
    ) -> JoinHandle<()>
    where
        T: Transport + 'static,
    {
        tokio::spawn(async move {
            let mut interval = ticker(period);
            loop {
                interval.tick().await;

                let Some(status) = callbacks.get_status() else {
                    continue;
                };
                match messaging.publish(&topic, status).await {
                    Ok(_) => {}
                    Err(ModuleError::NotConnected { state }) => {
                        debug!(?state, "Skipping status publish")
                    }
                    Err(e) => warn!(error = %e, topic = %topic, "Failed to publish status"),
                }
            }
        })
    }

    fn spawn_log_task<T>(period: Duration, messaging: Arc<MessagingClient<T>>) -> JoinHandle<()>
    where
        T: Transport + 'static,
    {
        tokio::spawn(async move {
            let mut interval = ticker(period);
            loop {
                interval.tick().await;
                let counters = messaging.counters().snapshot();
                info!(
                    "Published messages: {}, Received messages: {}",
                    counters.published, counters.received
                );
            }
        })
    }

    fn spawn_update_task<T>(
        hostname: String,
        period: Duration,
        messaging: Arc<MessagingClient<T>>,
        mut updater: Box<dyn UpdateHandler>,
    ) -> JoinHandle<()>
    where
        T: Transport + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = updater.begin(&hostname).await {
                error!("Error[{}]: {}", e.code(), e);
                return;
            }

            let mut interval = ticker(period);
            loop {
                interval.tick().await;
                handle_update_event(updater.poll().await, messaging.as_ref()).await;
            }
        })
    }
}

/// React to one update event; returns once any required session stop is done
pub async fn handle_update_event<T>(event: UpdateEvent, messaging: &MessagingClient<T>)
where
    T: Transport + 'static,
{
    match event {
        UpdateEvent::Idle => {}
        UpdateEvent::Started(target) => {
            match target {
                UpdateTarget::Firmware => info!("Start updating sketch..."),
                UpdateTarget::Filesystem => info!("Start updating filesystem..."),
            }
            if let Err(e) = messaging.stop_session().await {
                warn!(error = %e, "Failed to stop MQTT session cleanly");
            }
        }
        UpdateEvent::Progress { done, total } => {
            trace!("Progress: {}", progress_percent(done, total));
        }
        UpdateEvent::Completed => info!("Update successfully completed!"),
        UpdateEvent::Failed(e) => error!("Error[{}]: {}", e.code(), e),
    }
}
