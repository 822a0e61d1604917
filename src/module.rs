//! Module bring-up and supervision
//!
//! Boot is strictly sequential: logging, indicator, network join, messaging
//! connect, then the periodic tasks. A stage that fails ends the boot and hands
//! its error to the supervisor, which drives the indicator dark, stops every
//! task and performs the terminal action. After a successful boot the
//! supervisor keeps listening for the first fatal signal from the loss
//! watchers.

use crate::callbacks::{ModuleCallbacks, SilentCallbacks};
use crate::config::{EffectiveConfig, MessagingConfig, ModuleConfig, ModuleIdentity};
use crate::error::{ModuleError, ModuleResult};
use crate::indicator::{Indicator, IndicatorPin};
use crate::messaging::MessagingClient;
use crate::network::{ConnectivityManager, HostNetwork, NetworkDriver};
use crate::observability::{init_default_logging, log_redirect, LogRedirect};
use crate::protocol::Document;
use crate::scheduler::BackgroundScheduler;
use crate::state::{CounterSnapshot, LinkState, LinkStatus};
use crate::system::{HostSystem, SystemControl, TerminalAction};
use crate::transport::{MessageId, MqttError, MqttTransport, Transport};
use crate::update::UpdateHandler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const FATAL_CHANNEL_CAPACITY: usize = 8;

type Cleanup = Box<dyn FnOnce() + Send>;

/// Collects the module's collaborators before boot
pub struct ModuleBuilder {
    name: String,
    config: ModuleConfig,
    callbacks: Arc<dyn ModuleCallbacks>,
    indicator_pin: Option<Box<dyn IndicatorPin>>,
    updater: Option<Box<dyn UpdateHandler>>,
    system: Arc<dyn SystemControl>,
    logging: bool,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: ModuleConfig::new(),
            callbacks: Arc::new(SilentCallbacks),
            indicator_pin: None,
            updater: None,
            system: Arc::new(HostSystem),
            logging: true,
        }
    }

    pub fn config(mut self, config: ModuleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn callbacks(mut self, callbacks: Arc<dyn ModuleCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Output driving the notification indicator; needs `ModuleConfig::indicator`
    pub fn indicator_pin(mut self, pin: impl IndicatorPin + 'static) -> Self {
        self.indicator_pin = Some(Box::new(pin));
        self
    }

    pub fn updater(mut self, updater: impl UpdateHandler + 'static) -> Self {
        self.updater = Some(Box::new(updater));
        self
    }

    pub fn system(mut self, system: Arc<dyn SystemControl>) -> Self {
        self.system = system;
        self
    }

    /// Install the global console logger and log redirect (on by default)
    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    /// Boot on a hosted process: OS-owned network and an MQTT broker session
    pub async fn begin(self) -> ModuleResult<ModuleHandle<MqttTransport>> {
        self.begin_with(HostNetwork, MqttTransport::new).await
    }

    /// Boot with the given network driver and a transport built from the
    /// effective messaging settings
    ///
    /// On a bring-up failure the terminal action has already been performed
    /// when this returns the error.
    pub async fn begin_with<N, T, F>(
        self,
        network: N,
        make_transport: F,
    ) -> ModuleResult<ModuleHandle<T>>
    where
        N: NetworkDriver + 'static,
        T: Transport + 'static,
        F: FnOnce(&MessagingConfig) -> Result<T, MqttError>,
    {
        let Self {
            name,
            config,
            callbacks,
            indicator_pin,
            updater,
            system,
            logging,
        } = self;

        let redirect = if logging {
            let (layer, redirect) = log_redirect();
            if init_default_logging(layer) {
                Some(redirect)
            } else {
                debug!("Global logger already installed, log redirect disabled");
                None
            }
        } else {
            None
        };

        let config = Arc::new(config.resolve(&name));
        info!(
            name = %config.identity.name,
            hostname = %config.identity.hostname,
            "Starting SailTrack module"
        );
        debug!(config = ?config.redacted(), "Effective configuration");

        let (fatal_tx, mut fatal_rx) = mpsc::channel(FATAL_CHANNEL_CAPACITY);
        let network_link = Arc::new(LinkStatus::new());
        let mut supervisor = Supervisor::new(system, config.timeouts.suspend);

        if let (Some(pin), Some(indicator_config)) = (indicator_pin, config.indicator) {
            let off = supervisor.force_off.subscribe();
            supervisor.indicator =
                Some(Indicator::new(pin, indicator_config).spawn(network_link.clone(), off));
        }

        let mut connectivity =
            ConnectivityManager::new(network, config.network.clone(), network_link);
        if let Err(e) = connectivity
            .join(callbacks.as_ref(), config.timeouts.join())
            .await
        {
            supervisor.terminate(&e).await;
            return Err(e);
        }
        supervisor
            .tasks
            .push(connectivity.watch_for_loss(callbacks.clone(), fatal_tx.clone()));

        let transport = match make_transport(&config.messaging) {
            Ok(transport) => transport,
            Err(e) => {
                let e = ModuleError::from(e);
                supervisor.terminate(&e).await;
                return Err(e);
            }
        };
        let messaging = Arc::new(MessagingClient::new(
            transport,
            config.clone(),
            callbacks.clone(),
            fatal_tx,
        ));
        supervisor.on_terminate({
            let messaging = messaging.clone();
            move || messaging.shutdown_dispatcher()
        });

        let connected = tokio::select! {
            result = messaging.connect(config.timeouts.connect()) => result,
            Some(e) = fatal_rx.recv() => Err(e),
        };
        if let Err(e) = connected {
            supervisor.terminate(&e).await;
            return Err(e);
        }

        if let Some(redirect) = &redirect {
            if let Some(forwarder) =
                redirect.attach(messaging.clone(), &config.identity.name, config.limits.log_line)
            {
                supervisor.tasks.push(forwarder);
            }
        }

        let scheduler = Arc::new(BackgroundScheduler::new());
        scheduler.start(&config, messaging.clone(), callbacks, updater)?;
        supervisor.on_terminate({
            let scheduler = scheduler.clone();
            move || scheduler.shutdown()
        });

        let outcome = supervisor.outcome.subscribe();
        let supervisor = supervisor.run(fatal_rx);

        Ok(ModuleHandle {
            config,
            messaging,
            redirect,
            outcome,
            _supervisor: supervisor,
        })
    }
}

/// Sole executor of terminal actions
struct Supervisor {
    system: Arc<dyn SystemControl>,
    suspend_for: Duration,
    force_off: watch::Sender<bool>,
    indicator: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
    cleanups: Vec<Cleanup>,
    outcome: watch::Sender<Option<TerminalAction>>,
}

impl Supervisor {
    fn new(system: Arc<dyn SystemControl>, suspend_for: Duration) -> Self {
        Self {
            system,
            suspend_for,
            force_off: watch::channel(false).0,
            indicator: None,
            tasks: Vec::new(),
            cleanups: Vec::new(),
            outcome: watch::channel(None).0,
        }
    }

    fn on_terminate(&mut self, cleanup: impl FnOnce() + Send + 'static) {
        self.cleanups.push(Box::new(cleanup));
    }

    fn run(mut self, mut fatal_rx: mpsc::Receiver<ModuleError>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Some(e) = fatal_rx.recv().await {
                self.terminate(&e).await;
            }
        })
    }

    async fn terminate(&mut self, cause: &ModuleError) -> TerminalAction {
        // Bring-up faults without a dedicated action (e.g. a broker address the
        // transport rejects) restart like a failed connect.
        let action = cause
            .terminal_action(self.suspend_for)
            .unwrap_or(TerminalAction::Restart);
        error!(error = %cause, ?action, "Unrecoverable connectivity fault");

        self.force_off.send_replace(true);
        if let Some(indicator) = self.indicator.take() {
            let _ = indicator.await;
        }
        for cleanup in self.cleanups.drain(..) {
            cleanup();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }

        let system = self.system.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || system.perform(action)).await {
            error!(error = %e, "Terminal action did not complete");
        }
        self.outcome.send_replace(Some(action));
        action
    }
}

/// Running module, returned once bring-up succeeded
pub struct ModuleHandle<T: Transport> {
    config: Arc<EffectiveConfig>,
    messaging: Arc<MessagingClient<T>>,
    redirect: Option<LogRedirect>,
    outcome: watch::Receiver<Option<TerminalAction>>,
    _supervisor: JoinHandle<()>,
}

impl<T> ModuleHandle<T>
where
    T: Transport + 'static,
{
    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.config.identity
    }

    /// Publish a document; a `measurement` field is injected from the topic
    pub async fn publish(&self, topic: &str, document: Document) -> ModuleResult<MessageId> {
        self.messaging.publish(topic, document).await
    }

    pub async fn subscribe(&self, topic: &str) -> ModuleResult<MessageId> {
        self.messaging.subscribe(topic).await
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.messaging.counters().snapshot()
    }

    /// Messaging link state
    pub fn state(&self) -> LinkState {
        self.messaging.state()
    }

    /// Log lines that could not be queued for republishing
    pub fn dropped_log_lines(&self) -> u64 {
        self.redirect.as_ref().map_or(0, LogRedirect::dropped)
    }

    /// Resolve with the terminal action once the supervisor has performed it
    pub async fn wait(&self) -> TerminalAction {
        let mut outcome = self.outcome.clone();
        let action = match outcome.wait_for(Option::is_some).await {
            Ok(action) => (*action).unwrap_or(TerminalAction::Restart),
            Err(_) => TerminalAction::Restart,
        };
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        CallbackEvent, MockIndicator, MockNetwork, MockSystem, MockTransport, RecordingCallbacks,
    };
    use crate::transport::EventRoute;

    fn builder(callbacks: Arc<RecordingCallbacks>, system: MockSystem) -> ModuleBuilder {
        ModuleBuilder::new("test")
            .callbacks(callbacks)
            .system(Arc::new(system))
            .logging(false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_timeout_suspends_without_messaging() {
        let callbacks = Arc::new(RecordingCallbacks::new());
        let system = MockSystem::new();
        let transport = MockTransport::accepting();

        let result = builder(callbacks.clone(), system.clone())
            .begin_with(MockNetwork::never_joins(), |_: &MessagingConfig| {
                Ok(transport.clone())
            })
            .await;

        assert!(matches!(result, Err(ModuleError::JoinTimeout { .. })));
        assert_eq!(
            system.actions(),
            vec![TerminalAction::Suspend(Duration::from_secs(60))]
        );
        assert!(!callbacks
            .events()
            .contains(&CallbackEvent::MessagingBegin));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_restarts() {
        let callbacks = Arc::new(RecordingCallbacks::new());
        let system = MockSystem::new();

        let result = builder(callbacks.clone(), system.clone())
            .begin_with(MockNetwork::joining_after(Duration::ZERO), |_: &MessagingConfig| {
                Ok(MockTransport::unreachable())
            })
            .await;

        assert!(matches!(result, Err(ModuleError::ConnectTimeout { .. })));
        assert_eq!(system.actions(), vec![TerminalAction::Restart]);
        assert_eq!(
            callbacks.events(),
            vec![
                CallbackEvent::NetworkJoinBegin,
                CallbackEvent::NetworkJoinResult(true),
                CallbackEvent::MessagingBegin,
                CallbackEvent::MessagingResult(false),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_broker_restarts() {
        let system = MockSystem::new();

        let result = builder(Arc::new(RecordingCallbacks::new()), system.clone())
            .begin_with(MockNetwork::joining_after(Duration::ZERO), |_: &MessagingConfig| {
                Err::<MockTransport, _>(MqttError::InvalidBroker("bad host".to_string()))
            })
            .await;

        assert!(matches!(result, Err(ModuleError::Transport(_))));
        assert_eq!(system.actions(), vec![TerminalAction::Restart]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messaging_loss_restarts_and_forces_indicator_off() {
        let callbacks = Arc::new(RecordingCallbacks::new());
        let system = MockSystem::new();
        let transport = MockTransport::accepting();
        let pin = MockIndicator::new();

        let handle = builder(callbacks.clone(), system.clone())
            .config(ModuleConfig::new().indicator(2, false))
            .indicator_pin(pin.clone())
            .begin_with(MockNetwork::joining_after(Duration::ZERO), |_: &MessagingConfig| {
                Ok(transport.clone())
            })
            .await
            .unwrap();
        assert_eq!(handle.state(), LinkState::Connected);
        assert_eq!(handle.identity().hostname, "sailtrack-test");

        transport.inject(EventRoute::Disconnected).await;

        assert_eq!(handle.wait().await, TerminalAction::Restart);
        assert_eq!(system.actions(), vec![TerminalAction::Restart]);
        assert_eq!(pin.levels().last(), Some(&false));
        assert!(handle.publish("sensor/a", Document::new()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_loss_restarts() {
        let system = MockSystem::new();
        let network = MockNetwork::joining_after(Duration::ZERO);

        let handle = builder(Arc::new(RecordingCallbacks::new()), system.clone())
            .begin_with(network.clone(), |_: &MessagingConfig| {
                Ok(MockTransport::accepting())
            })
            .await
            .unwrap();

        network.trigger_loss();

        assert_eq!(handle.wait().await, TerminalAction::Restart);
        assert_eq!(system.actions(), vec![TerminalAction::Restart]);
    }
}
