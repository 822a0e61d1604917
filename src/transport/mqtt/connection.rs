//! Pure connection configuration for the MQTT session
//!
//! This module contains pure functions that turn the frozen messaging
//! configuration into broker options, plus the transport error type.

use crate::config::MessagingConfig;
use rumqttc::MqttOptions;
use std::time::Duration;
use thiserror::Error;

/// Broker keep-alive interval
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Capacity of the client request channel towards the event loop
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker address: {0}")]
    InvalidBroker(String),
    #[error("Session already started")]
    AlreadyStarted,
}

/// Pure function to configure MQTT options from the messaging configuration
///
/// The client identifier is the module hostname; sessions are clean so a
/// restarted module never inherits stale subscriptions.
pub fn configure_mqtt_options(config: &MessagingConfig) -> Result<MqttOptions, MqttError> {
    if config.host.trim().is_empty() || config.host.contains(char::is_whitespace) {
        return Err(MqttError::InvalidBroker(config.host.clone()));
    }
    if config.port == 0 {
        return Err(MqttError::InvalidBroker(format!("{}:0", config.host)));
    }

    let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);
    mqtt_options.set_credentials(&config.username, &config.password);
    mqtt_options.set_keep_alive(KEEP_ALIVE);
    mqtt_options.set_clean_session(true);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleConfig;

    fn test_messaging_config() -> MessagingConfig {
        ModuleConfig::new().resolve("test").messaging
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&test_messaging_config()).unwrap();
        assert_eq!(options.client_id(), "sailtrack-test");
        assert_eq!(
            options.broker_address(),
            ("192.168.42.1".to_string(), 1883)
        );
        assert_eq!(options.keep_alive(), KEEP_ALIVE);
    }

    #[test]
    fn test_invalid_broker_host() {
        let mut config = test_messaging_config();
        config.host = "not a host".to_string();

        let result = configure_mqtt_options(&config);
        assert!(matches!(result, Err(MqttError::InvalidBroker(_))));
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = test_messaging_config();
        config.port = 0;
        assert!(matches!(
            configure_mqtt_options(&config),
            Err(MqttError::InvalidBroker(_))
        ));
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("test".to_string().into()),
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::SubscriptionFailed("test".to_string().into()),
            MqttError::InvalidBroker("test".to_string()),
            MqttError::AlreadyStarted,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
