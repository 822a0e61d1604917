//! Broker session ownership and event dispatch
//!
//! [`MessagingClient`] performs the bounded connect, publishes and subscribes on
//! behalf of the application, and runs the single dispatch path through which
//! every session event reaches the callbacks. Only that path writes the
//! messaging link state and the delivery counters.

use crate::callbacks::ModuleCallbacks;
use crate::config::EffectiveConfig;
use crate::error::{ModuleError, ModuleResult};
use crate::poll::{poll_until, BRINGUP_POLL_INTERVAL};
use crate::protocol::{encode_document, Document, InboundMessage};
use crate::state::{Counters, Link, LinkState, LinkStatus};
use crate::transport::{EventRoute, MessageId, Transport};
use crate::{bringup_span, mqtt_span};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Bring-up phases, decided by a single compare-and-swap so a session drop
/// racing with a successful connect is reported exactly once
const PHASE_PENDING: u8 = 0;
const PHASE_REGISTERED: u8 = 1;
const PHASE_DROPPED: u8 = 2;

pub struct MessagingClient<T: Transport> {
    transport: Arc<T>,
    config: Arc<EffectiveConfig>,
    link: Arc<LinkStatus>,
    counters: Arc<Counters>,
    callbacks: Arc<dyn ModuleCallbacks>,
    fatal_tx: mpsc::Sender<ModuleError>,
    /// Until registered, only ConnAck and Disconnected are acted upon
    phase: AtomicU8,
    dispatcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<T> MessagingClient<T>
where
    T: Transport + 'static,
{
    pub fn new(
        transport: T,
        config: Arc<EffectiveConfig>,
        callbacks: Arc<dyn ModuleCallbacks>,
        fatal_tx: mpsc::Sender<ModuleError>,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            config,
            link: Arc::new(LinkStatus::new()),
            counters: Arc::new(Counters::new()),
            callbacks,
            fatal_tx,
            phase: AtomicU8::new(PHASE_PENDING),
            dispatcher: std::sync::Mutex::new(None),
        }
    }

    pub fn link(&self) -> &Arc<LinkStatus> {
        &self.link
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    pub fn state(&self) -> LinkState {
        self.link.get()
    }

    /// Open the broker session and wait at most `timeout` for it to be accepted
    ///
    /// Fires `on_messaging_begin`, then `on_messaging_result` exactly once. The
    /// remaining session events are only dispatched after a successful result.
    pub async fn connect(self: &Arc<Self>, timeout: Duration) -> ModuleResult<()> {
        let broker = self.config.messaging.broker_display();
        let span = bringup_span!(stage = "messaging", broker = %broker);

        async {
            let events = self.transport.start().await;
            self.callbacks.on_messaging_begin();
            info!("Connecting to '{}'...", broker);

            let connected = match events {
                Ok(events) => {
                    self.spawn_dispatcher(events);
                    let link = &self.link;
                    poll_until(timeout, BRINGUP_POLL_INTERVAL, || link.is_connected()).await
                }
                Err(e) => {
                    error!(error = %e, "Unable to open MQTT session");
                    false
                }
            };

            self.callbacks.on_messaging_result(connected);

            if !connected {
                error!("Impossible to connect to '{}'", broker);
                return Err(ModuleError::ConnectTimeout {
                    broker: broker.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }

            info!("Successfully connected to '{}'!", broker);
            if !self.register() {
                // Dropped after the wait succeeded; the dispatcher left it to us
                self.report_loss().await;
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    fn spawn_dispatcher(self: &Arc<Self>, mut events: mpsc::Receiver<EventRoute>) {
        let client = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !client.dispatch(event).await {
                    break;
                }
            }
            debug!("Session event dispatcher stopped");
        });

        if let Ok(mut slot) = self.dispatcher.lock() {
            *slot = Some(handle);
        }
    }

    fn register(&self) -> bool {
        self.phase
            .compare_exchange(
                PHASE_PENDING,
                PHASE_REGISTERED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn is_registered(&self) -> bool {
        self.phase.load(Ordering::Acquire) == PHASE_REGISTERED
    }

    async fn report_loss(&self) {
        self.callbacks.on_messaging_lost();
        error!(
            "Lost connection to '{}'...",
            self.config.messaging.broker_display()
        );
        let _ = self
            .fatal_tx
            .send(ModuleError::SessionLost(Link::Messaging))
            .await;
    }

    /// Apply one session event. Returns `false` once the session is over.
    pub async fn dispatch(&self, event: EventRoute) -> bool {
        match event {
            EventRoute::ConnectionAcknowledged => {
                self.link.advance(LinkState::Connected);
                return true;
            }
            EventRoute::Disconnected => {
                // A stopped session is not lost
                if self.link.advance(LinkState::Lost).is_none() {
                    return false;
                }
                let during_bringup = self
                    .phase
                    .compare_exchange(
                        PHASE_PENDING,
                        PHASE_DROPPED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
                // During bring-up the bounded wait runs out, or connect reports it
                if !during_bringup {
                    self.report_loss().await;
                }
                return false;
            }
            _ => {}
        }

        if !self.is_registered() {
            debug!(?event, "Ignoring session event before bring-up completed");
            return true;
        }

        match event {
            EventRoute::MessageReceived { topic, payload } => {
                self.counters.record_received();
                let limits = &self.config.limits;
                match InboundMessage::decode(
                    &topic,
                    &payload,
                    limits.inbound_topic,
                    limits.inbound_payload,
                ) {
                    Ok(message) => self.callbacks.on_message(&message.topic, &message.payload),
                    Err(e) => warn!(error = %e, "Dropping inbound message"),
                }
                true
            }
            EventRoute::PublishAcknowledged { packet_id } => {
                self.counters.record_published();
                tracing::trace!(packet_id, "Publish acknowledged");
                true
            }
            EventRoute::SubscriptionConfirmed { packet_id, granted } => {
                debug!(packet_id, granted, "Subscription confirmed");
                true
            }
            EventRoute::ConnectionAcknowledged
            | EventRoute::Disconnected
            | EventRoute::InfrastructureEvent(_)
            | EventRoute::OutgoingEvent => true,
        }
    }

    fn ensure_connected(&self) -> ModuleResult<()> {
        match self.link.get() {
            LinkState::Connected => Ok(()),
            state => Err(ModuleError::NotConnected { state }),
        }
    }

    /// Publish `document` on `topic` at least once, not retained
    ///
    /// A `measurement` field with the final topic segment is injected. A
    /// document that does not fit the publish buffer is rejected before anything
    /// is sent. The published counter moves only when the broker acknowledges.
    pub async fn publish(&self, topic: &str, document: Document) -> ModuleResult<MessageId> {
        self.ensure_connected()?;

        let payload = encode_document(topic, document, self.config.limits.publish_buffer)?;
        let id = self
            .transport
            .publish(topic, payload)
            .instrument(mqtt_span!(operation = "publish", topic = %topic))
            .await?;
        Ok(id)
    }

    /// Subscribe to `topic` at least once
    pub async fn subscribe(&self, topic: &str) -> ModuleResult<MessageId> {
        self.ensure_connected()?;

        let id = self
            .transport
            .subscribe(topic)
            .instrument(mqtt_span!(operation = "subscribe", topic = %topic))
            .await?;
        info!("Subscribed to '{}'", topic);
        Ok(id)
    }

    /// Stop the session for a remote update; no loss is reported afterwards
    pub async fn stop_session(&self) -> ModuleResult<()> {
        if self.link.advance(LinkState::Stopped).is_none() {
            return Ok(());
        }
        info!("Stopping MQTT session");
        self.transport.stop().await?;
        Ok(())
    }

    /// Abort the dispatcher task, used by the supervisor on terminal actions
    pub fn shutdown_dispatcher(&self) {
        if let Ok(mut slot) = self.dispatcher.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}
