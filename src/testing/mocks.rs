//! Mock implementations for testing
//!
//! Provides mock Transport, NetworkDriver, SystemControl, IndicatorPin and
//! UpdateHandler implementations plus recording callbacks, so the full
//! bring-up can be exercised without a radio or a broker.

use crate::callbacks::ModuleCallbacks;
use crate::config::NetworkConfig;
use crate::indicator::IndicatorPin;
use crate::network::{NetworkDriver, NetworkError};
use crate::protocol::Document;
use crate::system::{SystemControl, TerminalAction};
use crate::transport::{EventRoute, MessageId, MqttError, Transport};
use crate::update::{UpdateError, UpdateEvent, UpdateHandler};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

pub type PublishedMessage = (String, Vec<u8>);

const MOCK_EVENT_CAPACITY: usize = 64;

/// Poll `condition` every 10 ms for up to 5 s
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[derive(Debug)]
struct TransportInner {
    accepting: bool,
    events_tx: mpsc::Sender<EventRoute>,
    events_rx: Mutex<Option<mpsc::Receiver<EventRoute>>>,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<String>>,
    stops: AtomicUsize,
    next_id: AtomicU64,
}

/// In-memory broker session
///
/// The event channel exists from construction, so tests can inject events
/// before the session is started.
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<TransportInner>,
}

impl MockTransport {
    fn build(accepting: bool) -> Self {
        let (events_tx, events_rx) = mpsc::channel(MOCK_EVENT_CAPACITY);
        Self {
            inner: Arc::new(TransportInner {
                accepting,
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                published: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                stops: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Broker accepts the session as soon as it is started
    pub fn accepting() -> Self {
        Self::build(true)
    }

    /// Broker never answers
    pub fn unreachable() -> Self {
        Self::build(false)
    }

    /// Feed a session event to the dispatcher
    pub async fn inject(&self, event: EventRoute) {
        let _ = self.inner.events_tx.send(event).await;
    }

    /// Feed a session event without waiting, for use inside sync callbacks
    pub fn try_inject(&self, event: EventRoute) {
        let _ = self.inner.events_tx.try_send(event);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.published.lock().unwrap().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload)
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.inner.stops.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> MessageId {
        MessageId(self.inner.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start(&self) -> Result<mpsc::Receiver<EventRoute>, MqttError> {
        let events = self
            .inner
            .events_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(MqttError::AlreadyStarted)?;

        if self.inner.accepting {
            let _ = self
                .inner
                .events_tx
                .try_send(EventRoute::ConnectionAcknowledged);
        }
        Ok(events)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<MessageId, MqttError> {
        self.inner
            .published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(self.next_id())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageId, MqttError> {
        self.inner
            .subscriptions
            .lock()
            .unwrap()
            .push(topic.to_string());
        Ok(self.next_id())
    }

    async fn stop(&self) -> Result<(), MqttError> {
        self.inner.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum JoinBehaviour {
    After(Duration),
    Never,
    Fail,
}

#[derive(Debug)]
struct NetworkInner {
    behaviour: JoinBehaviour,
    began_at: Mutex<Option<Instant>>,
    configured: Mutex<Option<NetworkConfig>>,
    lost: watch::Sender<bool>,
}

/// Scripted station driver
#[derive(Debug, Clone)]
pub struct MockNetwork {
    inner: Arc<NetworkInner>,
}

impl MockNetwork {
    fn build(behaviour: JoinBehaviour) -> Self {
        let (lost, _) = watch::channel(false);
        Self {
            inner: Arc::new(NetworkInner {
                behaviour,
                began_at: Mutex::new(None),
                configured: Mutex::new(None),
                lost,
            }),
        }
    }

    /// Joined once `delay` has elapsed since `begin_station`
    pub fn joining_after(delay: Duration) -> Self {
        Self::build(JoinBehaviour::After(delay))
    }

    pub fn never_joins() -> Self {
        Self::build(JoinBehaviour::Never)
    }

    /// `begin_station` itself fails
    pub fn failing() -> Self {
        Self::build(JoinBehaviour::Fail)
    }

    /// Station configuration passed to the driver, if any
    pub fn configured(&self) -> Option<NetworkConfig> {
        self.inner.configured.lock().unwrap().clone()
    }

    /// Drop the station off the network
    pub fn trigger_loss(&self) {
        self.inner.lost.send_replace(true);
    }
}

#[async_trait]
impl NetworkDriver for MockNetwork {
    async fn begin_station(&mut self, config: &NetworkConfig) -> Result<(), NetworkError> {
        if let JoinBehaviour::Fail = self.inner.behaviour {
            return Err(NetworkError::Driver("radio unavailable".to_string()));
        }
        *self.inner.configured.lock().unwrap() = Some(config.clone());
        *self.inner.began_at.lock().unwrap() = Some(Instant::now());
        Ok(())
    }

    fn is_joined(&self) -> bool {
        if *self.inner.lost.borrow() {
            return false;
        }
        let began_at = *self.inner.began_at.lock().unwrap();
        match (self.inner.behaviour, began_at) {
            (JoinBehaviour::After(delay), Some(start)) => start.elapsed() >= delay,
            _ => false,
        }
    }

    async fn wait_for_disconnect(&mut self) {
        let mut lost = self.inner.lost.subscribe();
        let _ = lost.wait_for(|lost| *lost).await;
    }
}

/// Records terminal actions instead of performing them
#[derive(Debug, Clone, Default)]
pub struct MockSystem {
    actions: Arc<Mutex<Vec<TerminalAction>>>,
}

impl MockSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<TerminalAction> {
        self.actions.lock().unwrap().clone()
    }
}

impl SystemControl for MockSystem {
    fn restart(&self) {
        self.actions.lock().unwrap().push(TerminalAction::Restart);
    }

    fn suspend(&self, duration: Duration) {
        self.actions
            .lock()
            .unwrap()
            .push(TerminalAction::Suspend(duration));
    }
}

/// Records every level written to the indicator pin
#[derive(Debug, Clone, Default)]
pub struct MockIndicator {
    levels: Arc<Mutex<Vec<bool>>>,
}

impl MockIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> Vec<bool> {
        self.levels.lock().unwrap().clone()
    }
}

impl IndicatorPin for MockIndicator {
    fn set_level(&mut self, high: bool) {
        self.levels.lock().unwrap().push(high);
    }
}

type Observer = Box<dyn Fn() -> usize + Send + Sync>;

/// Plays back a fixed sequence of update events, then stays idle
///
/// With an observer installed, every poll records the observer's value, which lets a
/// test observe what had already happened when the handler ran.
pub struct ScriptedUpdater {
    script: VecDeque<UpdateEvent>,
    begin_result: Result<(), UpdateError>,
    observer: Option<Observer>,
    polls: Arc<Mutex<Vec<usize>>>,
    advertised: Arc<Mutex<Option<String>>>,
}

impl ScriptedUpdater {
    pub fn new(script: Vec<UpdateEvent>) -> Self {
        Self {
            script: script.into(),
            begin_result: Ok(()),
            observer: None,
            polls: Arc::new(Mutex::new(Vec::new())),
            advertised: Arc::new(Mutex::new(None)),
        }
    }

    pub fn observing<F>(mut self, observer: F) -> Self
    where
        F: Fn() -> usize + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn failing_begin(mut self, error: UpdateError) -> Self {
        self.begin_result = Err(error);
        self
    }

    /// Observer value at each poll, in order
    pub fn poll_log(&self) -> Arc<Mutex<Vec<usize>>> {
        self.polls.clone()
    }

    pub fn advertised(&self) -> Arc<Mutex<Option<String>>> {
        self.advertised.clone()
    }
}

#[async_trait]
impl UpdateHandler for ScriptedUpdater {
    async fn begin(&mut self, hostname: &str) -> Result<(), UpdateError> {
        *self.advertised.lock().unwrap() = Some(hostname.to_string());
        self.begin_result
    }

    async fn poll(&mut self) -> UpdateEvent {
        let observed = self
            .observer
            .as_ref()
            .map(|observer| observer())
            .unwrap_or_default();
        self.polls.lock().unwrap().push(observed);
        self.script.pop_front().unwrap_or(UpdateEvent::Idle)
    }
}

/// Lifecycle hook invocations seen by [`RecordingCallbacks`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    NetworkJoinBegin,
    NetworkJoinResult(bool),
    NetworkLost,
    MessagingBegin,
    MessagingResult(bool),
    MessagingLost,
}

/// Callbacks that record everything they are handed
#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    events: Mutex<Vec<CallbackEvent>>,
    messages: Mutex<Vec<(String, String)>>,
    status: Option<Document>,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every heartbeat with `status`
    pub fn with_status(status: Document) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    fn record(&self, event: CallbackEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ModuleCallbacks for RecordingCallbacks {
    fn on_network_join_begin(&self) {
        self.record(CallbackEvent::NetworkJoinBegin);
    }

    fn on_network_join_result(&self, success: bool) {
        self.record(CallbackEvent::NetworkJoinResult(success));
    }

    fn on_network_lost(&self) {
        self.record(CallbackEvent::NetworkLost);
    }

    fn on_messaging_begin(&self) {
        self.record(CallbackEvent::MessagingBegin);
    }

    fn on_messaging_result(&self, success: bool) {
        self.record(CallbackEvent::MessagingResult(success));
    }

    fn on_messaging_lost(&self) {
        self.record(CallbackEvent::MessagingLost);
    }

    fn on_message(&self, topic: &str, payload: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
    }

    fn get_status(&self) -> Option<Document> {
        self.status.clone()
    }
}
