//! Impure I/O operations for the MQTT session
//!
//! This module owns the `rumqttc` client and event loop, forwarding routed
//! session events to the messaging client over a channel.

use super::connection::{configure_mqtt_options, MqttError, REQUEST_CHANNEL_CAPACITY};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MessagingConfig;
use crate::poll::BRINGUP_POLL_INTERVAL;
use crate::transport::{MessageId, Transport};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, QoS};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the session event channel towards the dispatcher
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long `stop` waits for the DISCONNECT packet to be flushed
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// MQTT session backed by `rumqttc`
pub struct MqttClient {
    client_id: String,
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    established: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl MqttClient {
    pub fn new(config: &MessagingConfig) -> Result<Self, MqttError> {
        let mqtt_options = configure_mqtt_options(config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(MqttClient {
            client_id: config.client_id.clone(),
            client,
            event_loop: Mutex::new(Some(event_loop)),
            event_loop_handle: Mutex::new(None),
            shutdown_tx,
            established: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(0),
        })
    }

    fn next_message_id(&self) -> MessageId {
        MessageId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Drive the event loop until shutdown, until our DISCONNECT is sent or
    /// until an established session drops
    ///
    /// Before the first ConnAck, poll errors mean the broker is not reachable
    /// yet and polling continues at the bring-up cadence; the bounded wait in the
    /// messaging client decides when to give up.
    async fn run_event_loop(
        client_id: String,
        mut event_loop: EventLoop,
        events_tx: mpsc::Sender<EventRoute>,
        mut shutdown_rx: watch::Receiver<bool>,
        established: Arc<AtomicBool>,
    ) {
        info!("Starting MQTT event loop for client: {}", client_id);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            if MessageHandler::is_disconnect_sent(&event) {
                                debug!(target: "mqtt_transport", "DISCONNECT sent to broker");
                                break;
                            }
                            let route = MessageHandler::route_mqtt_event(&event);
                            if route.is_internal() {
                                tracing::trace!(target: "mqtt_transport", "MQTT event: {:?}", route);
                                continue;
                            }
                            if route == EventRoute::ConnectionAcknowledged {
                                established.store(true, Ordering::Release);
                            }
                            let disconnected = route == EventRoute::Disconnected;
                            if events_tx.send(route).await.is_err() || disconnected {
                                break;
                            }
                        }
                        Err(e) if established.load(Ordering::Acquire) => {
                            warn!("MQTT event loop error for client {}: {}", client_id, e);
                            let _ = events_tx.send(EventRoute::Disconnected).await;
                            break;
                        }
                        Err(e) => {
                            debug!(target: "mqtt_transport", "Broker not reachable yet: {}", e);
                            tokio::time::sleep(BRINGUP_POLL_INTERVAL).await;
                        }
                    }
                }
            }
        }
        info!("MQTT event loop stopped for client: {}", client_id);
    }
}

#[async_trait]
impl Transport for MqttClient {
    async fn start(&self) -> Result<mpsc::Receiver<EventRoute>, MqttError> {
        let event_loop = self
            .event_loop
            .lock()
            .await
            .take()
            .ok_or(MqttError::AlreadyStarted)?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let handle = tokio::spawn(Self::run_event_loop(
            self.client_id.clone(),
            event_loop,
            events_tx,
            self.shutdown_tx.subscribe(),
            Arc::clone(&self.established),
        ));
        *self.event_loop_handle.lock().await = Some(handle);

        Ok(events_rx)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<MessageId, MqttError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        let id = self.next_message_id();
        tracing::trace!(target: "mqtt_transport", "Queued publish {:?} on {}", id, topic);
        Ok(id)
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageId, MqttError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        debug!(target: "mqtt_transport", "Subscribed to: {}", topic);
        Ok(self.next_message_id())
    }

    async fn stop(&self) -> Result<(), MqttError> {
        let disconnect = self
            .client
            .try_disconnect()
            .map_err(|e| MqttError::ConnectionFailed(Box::new(e)));

        let Some(mut handle) = self.event_loop_handle.lock().await.take() else {
            return disconnect;
        };

        // An established session exits the loop once DISCONNECT is flushed
        if disconnect.is_ok() && self.established.load(Ordering::Acquire) {
            match tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {
                    info!("MQTT session closed gracefully");
                    return disconnect;
                }
                Ok(Err(e)) => {
                    warn!("MQTT event loop ended with error: {}", e);
                    return disconnect;
                }
                Err(_) => warn!("DISCONNECT not flushed in time, forcing shutdown"),
            }
        }

        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(Duration::from_secs(2), handle).await {
            Ok(Ok(())) => info!("MQTT event loop shut down"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("MQTT event loop ended with error: {}", e),
            Err(_) => warn!("MQTT event loop didn't shut down in time"),
            _ => {}
        }

        disconnect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleConfig;

    fn test_client() -> MqttClient {
        let config = ModuleConfig::new().resolve("test").messaging;
        MqttClient::new(&config).expect("client creation")
    }

    #[tokio::test]
    async fn test_start_only_once() {
        let client = test_client();

        let first = client.start().await;
        assert!(first.is_ok());

        let second = client.start().await;
        assert!(matches!(second, Err(MqttError::AlreadyStarted)));

        client.stop().await.ok();
    }

    #[tokio::test]
    async fn test_message_ids_increase() {
        let client = test_client();
        // Requests are queued locally even before the session is up
        let first = client.publish("sensor/a", b"{}".to_vec()).await.unwrap();
        let second = client.subscribe("cmd/a").await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_stop_without_session_returns_promptly() {
        let client = test_client();
        client.start().await.unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(1), client.stop()).await;
        assert!(stopped.is_ok());
        assert!(!client.established.load(Ordering::Acquire));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ModuleConfig::new().resolve("test").messaging;
        config.host = String::new();
        assert!(MqttClient::new(&config).is_err());
    }
}
