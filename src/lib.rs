//! SailTrack Module - connectivity and lifecycle layer
//!
//! Every node of the SailTrack boat telemetry network boots the same way: console
//! logging, a bounded wireless network join, a bounded MQTT session, then periodic
//! status heartbeats, counter logging and remote-update polling. Applications only
//! supply their sensor logic through [`ModuleCallbacks`].
//!
//! # Overview
//!
//! - Configuration with documented defaults, frozen at boot
//! - Network join and MQTT connect with hard timeouts (suspend / restart)
//! - Publish with automatic `measurement` injection and a bounded buffer
//! - Single-path dispatch of session events to the callbacks
//! - Notification indicator and log republishing on `log/<name>`
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sailtrack_module::{Document, ModuleBuilder, ModuleCallbacks, ModuleConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct Counter;
//!
//! impl ModuleCallbacks for Counter {
//!     fn on_message(&self, topic: &str, payload: &str) {
//!         println!("{topic}: {payload}");
//!     }
//!
//!     fn get_status(&self) -> Option<Document> {
//!         json!({"battery": {"voltage": 4.1}}).as_object().cloned()
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let module = ModuleBuilder::new("counter")
//!     .config(ModuleConfig::new().wifi("SailTrack-Net", "sailtracknet"))
//!     .callbacks(Arc::new(Counter))
//!     .begin()
//!     .await?;
//!
//! let mut count = Document::new();
//! count.insert("count".to_string(), json!(5));
//! // Sent as {"count":5,"measurement":"counter0"}
//! module.publish("sensor/counter0", count).await?;
//!
//! module.wait().await;
//! # Ok::<(), sailtrack_module::ModuleError>(())
//! # });
//! ```

pub mod callbacks;
pub mod config;
pub mod error;
pub mod indicator;
pub mod messaging;
pub mod module;
pub mod network;
pub mod observability;
pub mod poll;
pub mod protocol;
pub mod scheduler;
pub mod state;
pub mod system;
pub mod testing;
pub mod transport;
pub mod update;

pub use callbacks::{ModuleCallbacks, SilentCallbacks};
pub use config::{EffectiveConfig, ModuleConfig, ModuleIdentity};
pub use error::{ModuleError, ModuleResult};
pub use indicator::IndicatorPin;
pub use module::{ModuleBuilder, ModuleHandle};
pub use network::{HostNetwork, NetworkDriver};
pub use protocol::Document;
pub use state::{CounterSnapshot, LinkState};
pub use system::{HostSystem, SystemControl, TerminalAction};
pub use transport::mqtt::MqttClient;
pub use transport::{MessageId, Transport};
pub use update::{UpdateEvent, UpdateHandler};
