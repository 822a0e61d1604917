//! Republishes log lines on `log/<name>`
//!
//! [`LogRedirectLayer`] sits next to the console layer, so every event is still
//! written locally. While the messaging link is connected each event is also
//! rendered to one line and queued with `try_send`; a forwarding task drains the
//! queue and publishes `{"message": <line>}`. A full queue drops the line.
//!
//! Events raised by the forwarding task, events raised while a line is being
//! queued on the same thread, TRACE events and transport internals are never
//! redirected, so republishing cannot feed itself.

use crate::messaging::MessagingClient;
use crate::protocol::{log_document, TopicBuilder};
use crate::state::LinkStatus;
use crate::transport::Transport;
use std::cell::Cell;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{debug, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

pub const REDIRECT_QUEUE_CAPACITY: usize = 64;

/// Target used by the MQTT transport for per-packet events
const TRANSPORT_TARGET: &str = "mqtt_transport";

thread_local! {
    static REDIRECTING: Cell<bool> = const { Cell::new(false) };
}

tokio::task_local! {
    static FORWARDING: ();
}

#[derive(Debug)]
struct RedirectState {
    link: OnceLock<Arc<LinkStatus>>,
    max_line: AtomicUsize,
    dropped: AtomicU64,
}

impl RedirectState {
    fn is_connected(&self) -> bool {
        self.link.get().is_some_and(|link| link.is_connected())
    }
}

/// Create the layer and the handle that later attaches it to a session
pub fn log_redirect() -> (LogRedirectLayer, LogRedirect) {
    log_redirect_with_capacity(REDIRECT_QUEUE_CAPACITY)
}

pub fn log_redirect_with_capacity(capacity: usize) -> (LogRedirectLayer, LogRedirect) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let state = Arc::new(RedirectState {
        link: OnceLock::new(),
        max_line: AtomicUsize::new(crate::config::DEFAULT_MAX_LOG_LINE),
        dropped: AtomicU64::new(0),
    });

    (
        LogRedirectLayer {
            state: state.clone(),
            tx,
        },
        LogRedirect {
            state,
            rx: Mutex::new(Some(rx)),
        },
    )
}

/// `tracing` layer feeding the redirect queue
pub struct LogRedirectLayer {
    state: Arc<RedirectState>,
    tx: mpsc::Sender<String>,
}

impl LogRedirectLayer {
    fn redirects(&self, event: &Event<'_>) -> bool {
        let metadata = event.metadata();
        *metadata.level() <= Level::DEBUG
            && metadata.target() != TRANSPORT_TARGET
            && !metadata.target().starts_with("rumqttc")
            && FORWARDING.try_with(|_| ()).is_err()
            && self.state.is_connected()
    }
}

impl<S> Layer<S> for LogRedirectLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.redirects(event) {
            return;
        }
        if REDIRECTING.with(|flag| flag.replace(true)) {
            return;
        }

        let line = render_line(event);
        let max_line = self.state.max_line.load(Ordering::Relaxed);
        let line = clamp_line(&line, max_line).to_string();

        match self.tx.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.state.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        REDIRECTING.with(|flag| flag.set(false));
    }
}

/// Owner side of the redirect queue
#[derive(Debug)]
pub struct LogRedirect {
    state: Arc<RedirectState>,
    rx: Mutex<Option<mpsc::Receiver<String>>>,
}

impl LogRedirect {
    /// Lines dropped because the queue was full or no forwarder was running
    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    /// Start forwarding to `log/<name>` through `messaging`
    ///
    /// Returns `None` if a forwarder is already running.
    pub fn attach<T>(
        &self,
        messaging: Arc<MessagingClient<T>>,
        name: &str,
        max_line: usize,
    ) -> Option<JoinHandle<()>>
    where
        T: Transport + 'static,
    {
        let mut rx = self.rx.lock().ok()?.take()?;
        self.state.max_line.store(max_line, Ordering::Relaxed);
        let _ = self.state.link.set(messaging.link().clone());

        let topic = TopicBuilder::build_log_topic(name);
        Some(tokio::spawn(FORWARDING.scope((), async move {
            while let Some(line) = rx.recv().await {
                if !messaging.link().is_connected() {
                    continue;
                }
                if let Err(e) = messaging.publish(&topic, log_document(&line)).await {
                    debug!(error = %e, "Log line not republished");
                }
            }
        })))
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

fn render_line(event: &Event<'_>) -> String {
    let mut visitor = LineVisitor::default();
    event.record(&mut visitor);

    let metadata = event.metadata();
    format!(
        "{} {}: {}{}",
        metadata.level(),
        metadata.target(),
        visitor.message.trim_end_matches(['\r', '\n']),
        visitor.fields
    )
}

/// Strip one trailing line terminator and cap at `max` bytes on a char boundary
pub fn clamp_line(line: &str, max: usize) -> &str {
    let line = match line.strip_suffix('\n') {
        Some(rest) => rest.strip_suffix('\r').unwrap_or(rest),
        None => line,
    };
    if line.len() <= max {
        return line;
    }

    let mut end = max;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}
