//! MQTT session implementation
//!
//! The module is split into three focused sub-modules:
//!
//! - [`connection`] - Pure option construction and transport errors
//! - [`message_handler`] - Pure event routing
//! - [`client`] - Impure I/O operations and the event loop task
//!
//! # Usage
//!
//! ```rust,no_run
//! use sailtrack_module::config::ModuleConfig;
//! use sailtrack_module::transport::mqtt::MqttClient;
//! use sailtrack_module::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let config = ModuleConfig::new().resolve("counter");
//! let client = MqttClient::new(&config.messaging)?;
//! let mut events = client.start().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

// Re-export public types for convenience
pub use client::MqttClient;
pub use connection::{configure_mqtt_options, MqttError};
pub use message_handler::{EventRoute, MessageHandler};
