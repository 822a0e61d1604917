//! Module configuration
//!
//! Settings are supplied programmatically through [`ModuleConfig`] before
//! bring-up. [`ModuleConfig::resolve`] fills every unset field with its
//! documented default exactly once and returns an [`EffectiveConfig`], which has
//! no setters and is shared read-only for the rest of the process lifetime.

use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;

/// Every module hostname starts with this prefix
pub const HOSTNAME_PREFIX: &str = "sailtrack-";

pub const DEFAULT_WIFI_SSID: &str = "SailTrack-Net";
pub const DEFAULT_WIFI_PASSWORD: &str = "sailtracknet";
pub const DEFAULT_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 42, 1);
pub const DEFAULT_SUBNET: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

pub const DEFAULT_MQTT_HOST: &str = "192.168.42.1";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTT_USERNAME: &str = "mosquitto";
pub const DEFAULT_MQTT_PASSWORD: &str = "sailtrack";

pub const DEFAULT_STATUS_RATE_HZ: f64 = 1.0;
pub const DEFAULT_LOG_RATE_HZ: f64 = 0.1;
pub const DEFAULT_UPDATE_RATE_HZ: f64 = 1.0;

pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SUSPEND_SECS: u64 = 60;

pub const DEFAULT_PUBLISH_BUFFER_CAPACITY: usize = 512;
pub const DEFAULT_MAX_INBOUND_PAYLOAD: usize = 4096;
pub const DEFAULT_MAX_INBOUND_TOPIC: usize = 128;
pub const DEFAULT_MAX_LOG_LINE: usize = 200;

/// Caller-supplied settings; `None` (or an empty string) means "use the default"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleConfig {
    pub network: NetworkSettings,
    pub messaging: MessagingSettings,
    pub indicator: Option<IndicatorConfig>,
    pub status_rate_hz: Option<f64>,
    pub log_rate_hz: Option<f64>,
    pub update_rate_hz: Option<f64>,
    pub join_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub suspend_duration: Option<Duration>,
    pub publish_buffer_capacity: Option<usize>,
    pub max_inbound_payload: Option<usize>,
    pub max_inbound_topic: Option<usize>,
    pub max_log_line: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkSettings {
    pub ssid: Option<String>,
    pub password: Option<String>,
    /// Static address; unset means dynamic addressing
    pub static_ip: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub subnet: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagingSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Notification indicator output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndicatorConfig {
    /// Platform output identifier (GPIO number on most boards)
    pub pin: u8,
    /// Output is lit when driven low
    pub active_low: bool,
}

impl ModuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wifi(mut self, ssid: impl Into<String>, password: impl Into<String>) -> Self {
        self.network.ssid = Some(ssid.into());
        self.network.password = Some(password.into());
        self
    }

    pub fn static_ip(mut self, ip: Ipv4Addr, gateway: Ipv4Addr, subnet: Ipv4Addr) -> Self {
        self.network.static_ip = Some(ip);
        self.network.gateway = Some(gateway);
        self.network.subnet = Some(subnet);
        self
    }

    pub fn mqtt(
        mut self,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.messaging.host = Some(host.into());
        self.messaging.port = Some(port);
        self.messaging.username = Some(username.into());
        self.messaging.password = Some(password.into());
        self
    }

    pub fn indicator(mut self, pin: u8, active_low: bool) -> Self {
        self.indicator = Some(IndicatorConfig { pin, active_low });
        self
    }

    pub fn rates(mut self, status_hz: f64, log_hz: f64, update_hz: f64) -> Self {
        self.status_rate_hz = Some(status_hz);
        self.log_rate_hz = Some(log_hz);
        self.update_rate_hz = Some(update_hz);
        self
    }

    pub fn timeouts(mut self, join_ms: u64, connect_ms: u64) -> Self {
        self.join_timeout_ms = Some(join_ms);
        self.connect_timeout_ms = Some(connect_ms);
        self
    }

    pub fn suspend_duration(mut self, duration: Duration) -> Self {
        self.suspend_duration = Some(duration);
        self
    }

    pub fn publish_buffer_capacity(mut self, capacity: usize) -> Self {
        self.publish_buffer_capacity = Some(capacity);
        self
    }

    /// Freeze the configuration for module `name`, substituting defaults
    pub fn resolve(self, name: &str) -> EffectiveConfig {
        let identity = ModuleIdentity::new(name);

        let network = NetworkConfig {
            ssid: text_or_default("wifi.ssid", self.network.ssid, DEFAULT_WIFI_SSID),
            password: text_or_default(
                "wifi.password",
                self.network.password,
                DEFAULT_WIFI_PASSWORD,
            ),
            static_ip: self.network.static_ip,
            gateway: or_default("wifi.gateway", self.network.gateway, DEFAULT_GATEWAY),
            subnet: or_default("wifi.subnet", self.network.subnet, DEFAULT_SUBNET),
            hostname: identity.hostname.clone(),
        };

        let messaging = MessagingConfig {
            host: text_or_default("mqtt.host", self.messaging.host, DEFAULT_MQTT_HOST),
            port: or_default(
                "mqtt.port",
                self.messaging.port.filter(|port| *port != 0),
                DEFAULT_MQTT_PORT,
            ),
            username: text_or_default(
                "mqtt.username",
                self.messaging.username,
                DEFAULT_MQTT_USERNAME,
            ),
            password: text_or_default(
                "mqtt.password",
                self.messaging.password,
                DEFAULT_MQTT_PASSWORD,
            ),
            client_id: identity.hostname.clone(),
        };

        let rates = Rates {
            status_hz: rate_or_default("rates.status", self.status_rate_hz, DEFAULT_STATUS_RATE_HZ),
            log_hz: rate_or_default("rates.log", self.log_rate_hz, DEFAULT_LOG_RATE_HZ),
            update_hz: rate_or_default("rates.update", self.update_rate_hz, DEFAULT_UPDATE_RATE_HZ),
        };

        let timeouts = Timeouts {
            join_ms: or_default(
                "timeouts.join_ms",
                self.join_timeout_ms,
                DEFAULT_JOIN_TIMEOUT_MS,
            ),
            connect_ms: or_default(
                "timeouts.connect_ms",
                self.connect_timeout_ms,
                DEFAULT_CONNECT_TIMEOUT_MS,
            ),
            suspend: or_default(
                "timeouts.suspend",
                self.suspend_duration,
                Duration::from_secs(DEFAULT_SUSPEND_SECS),
            ),
        };

        let limits = Limits {
            publish_buffer: size_or_default(
                "limits.publish_buffer",
                self.publish_buffer_capacity,
                DEFAULT_PUBLISH_BUFFER_CAPACITY,
            ),
            inbound_payload: size_or_default(
                "limits.inbound_payload",
                self.max_inbound_payload,
                DEFAULT_MAX_INBOUND_PAYLOAD,
            ),
            inbound_topic: size_or_default(
                "limits.inbound_topic",
                self.max_inbound_topic,
                DEFAULT_MAX_INBOUND_TOPIC,
            ),
            log_line: size_or_default("limits.log_line", self.max_log_line, DEFAULT_MAX_LOG_LINE),
        };

        EffectiveConfig {
            identity,
            network,
            messaging,
            indicator: self.indicator,
            rates,
            timeouts,
            limits,
        }
    }
}

fn or_default<T: std::fmt::Debug>(field: &str, value: Option<T>, default: T) -> T {
    match value {
        Some(value) => value,
        None => {
            debug!(field, default = ?default, "Using default configuration value");
            default
        }
    }
}

fn text_or_default(field: &str, value: Option<String>, default: &str) -> String {
    or_default(
        field,
        value.filter(|text| !text.is_empty()),
        default.to_string(),
    )
}

fn rate_or_default(field: &str, value: Option<f64>, default: f64) -> f64 {
    or_default(
        field,
        value.filter(|hz| hz.is_finite() && *hz > 0.0),
        default,
    )
}

fn size_or_default(field: &str, value: Option<usize>, default: usize) -> usize {
    or_default(field, value.filter(|size| *size > 0), default)
}

/// Module name and the hostname derived from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleIdentity {
    pub name: String,
    pub hostname: String,
}

impl ModuleIdentity {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hostname: format!("{HOSTNAME_PREFIX}{name}"),
        }
    }
}

/// Frozen configuration used from bring-up onwards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfig {
    pub identity: ModuleIdentity,
    pub network: NetworkConfig,
    pub messaging: MessagingConfig,
    pub indicator: Option<IndicatorConfig>,
    pub rates: Rates,
    pub timeouts: Timeouts,
    pub limits: Limits,
}

impl EffectiveConfig {
    /// Copy with credentials masked, suitable for logging
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.network.password = "***".to_string();
        copy.messaging.password = "***".to_string();
        copy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkConfig {
    pub ssid: String,
    pub password: String,
    pub static_ip: Option<Ipv4Addr>,
    pub gateway: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub hostname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagingConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
}

impl MessagingConfig {
    /// Broker address as shown in logs, without the password
    pub fn broker_display(&self) -> String {
        format!("mqtt://{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Periodic task rates in Hz
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rates {
    pub status_hz: f64,
    pub log_hz: f64,
    pub update_hz: f64,
}

impl Rates {
    pub fn status_period(&self) -> Duration {
        period(self.status_hz)
    }

    pub fn log_period(&self) -> Duration {
        period(self.log_hz)
    }

    pub fn update_period(&self) -> Duration {
        period(self.update_hz)
    }
}

const MIN_PERIOD: Duration = Duration::from_millis(1);
const MAX_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

fn period(hz: f64) -> Duration {
    Duration::try_from_secs_f64(1.0 / hz)
        .unwrap_or(MAX_PERIOD)
        .clamp(MIN_PERIOD, MAX_PERIOD)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timeouts {
    pub join_ms: u64,
    pub connect_ms: u64,
    pub suspend: Duration,
}

impl Timeouts {
    pub fn join(&self) -> Duration {
        Duration::from_millis(self.join_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

/// Buffer capacities in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub publish_buffer: usize,
    pub inbound_payload: usize,
    pub inbound_topic: usize,
    pub log_line: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_config_resolves_to_defaults() {
        let config = ModuleConfig::new().resolve("counter");

        assert_eq!(config.network.ssid, DEFAULT_WIFI_SSID);
        assert_eq!(config.network.password, DEFAULT_WIFI_PASSWORD);
        assert_eq!(config.network.gateway, DEFAULT_GATEWAY);
        assert_eq!(config.network.subnet, DEFAULT_SUBNET);
        assert_eq!(config.network.static_ip, None);
        assert_eq!(config.messaging.host, DEFAULT_MQTT_HOST);
        assert_eq!(config.messaging.port, DEFAULT_MQTT_PORT);
        assert_eq!(config.messaging.username, DEFAULT_MQTT_USERNAME);
        assert_eq!(config.messaging.password, DEFAULT_MQTT_PASSWORD);
        assert_eq!(config.rates.status_hz, DEFAULT_STATUS_RATE_HZ);
        assert_eq!(config.timeouts.join_ms, DEFAULT_JOIN_TIMEOUT_MS);
        assert_eq!(config.limits.publish_buffer, DEFAULT_PUBLISH_BUFFER_CAPACITY);
        assert!(config.indicator.is_none());
    }

    #[test]
    fn test_empty_ssid_uses_default() {
        let config = ModuleConfig::new().wifi("", "secret").resolve("counter");
        assert_eq!(config.network.ssid, DEFAULT_WIFI_SSID);
        assert_eq!(config.network.password, "secret");
    }

    #[test]
    fn test_caller_values_are_kept() {
        let config = ModuleConfig::new()
            .wifi("Boat-AP", "hunter22")
            .static_ip(
                Ipv4Addr::new(192, 168, 42, 100),
                Ipv4Addr::new(192, 168, 42, 254),
                Ipv4Addr::new(255, 255, 0, 0),
            )
            .mqtt("10.0.0.2", 1884, "module", "pw")
            .indicator(5, true)
            .rates(2.0, 0.5, 4.0)
            .timeouts(3000, 4000)
            .resolve("wind");

        assert_eq!(config.network.ssid, "Boat-AP");
        assert_eq!(config.network.static_ip, Some(Ipv4Addr::new(192, 168, 42, 100)));
        assert_eq!(config.network.gateway, Ipv4Addr::new(192, 168, 42, 254));
        assert_eq!(config.messaging.host, "10.0.0.2");
        assert_eq!(config.messaging.port, 1884);
        assert_eq!(
            config.indicator,
            Some(IndicatorConfig {
                pin: 5,
                active_low: true
            })
        );
        assert_eq!(config.rates.update_period(), Duration::from_millis(250));
        assert_eq!(config.timeouts.connect(), Duration::from_millis(4000));
    }

    #[test]
    fn test_client_id_is_hostname() {
        let config = ModuleConfig::new().resolve("gps");
        assert_eq!(config.messaging.client_id, "sailtrack-gps");
        assert_eq!(config.network.hostname, "sailtrack-gps");
    }

    #[test]
    fn test_invalid_rates_and_zero_port_fall_back() {
        let mut raw = ModuleConfig::new().rates(0.0, -1.0, f64::NAN);
        raw.messaging.port = Some(0);
        let config = raw.resolve("imu");

        assert_eq!(config.rates.status_hz, DEFAULT_STATUS_RATE_HZ);
        assert_eq!(config.rates.log_hz, DEFAULT_LOG_RATE_HZ);
        assert_eq!(config.rates.update_hz, DEFAULT_UPDATE_RATE_HZ);
        assert_eq!(config.messaging.port, DEFAULT_MQTT_PORT);
    }

    #[test]
    fn test_default_log_period() {
        let config = ModuleConfig::new().resolve("imu");
        assert_eq!(config.rates.log_period(), Duration::from_secs(10));
        assert_eq!(config.rates.status_period(), Duration::from_secs(1));
    }

    #[test]
    fn test_broker_display_hides_password() {
        let config = ModuleConfig::new().resolve("imu");
        let shown = config.messaging.broker_display();
        assert_eq!(shown, "mqtt://mosquitto@192.168.42.1:1883");
        assert!(!shown.contains(DEFAULT_MQTT_PASSWORD));
    }

    #[test]
    fn test_redacted_masks_credentials() {
        let config = ModuleConfig::new().resolve("imu");
        let json = serde_json::to_string(&config.redacted()).unwrap();
        assert!(!json.contains(DEFAULT_WIFI_PASSWORD));
        assert!(!json.contains("\"sailtrack\""));
        assert!(json.contains("sailtrack-imu"));
    }

    proptest! {
        #[test]
        fn prop_hostname_is_prefix_plus_name(name in "\\PC*") {
            let identity = ModuleIdentity::new(&name);
            prop_assert_eq!(identity.hostname, format!("{HOSTNAME_PREFIX}{name}"));
        }

        #[test]
        fn prop_set_fields_survive_resolution(ssid in "[a-zA-Z0-9-]{1,32}", port in 1u16..) {
            let mut raw = ModuleConfig::new();
            raw.network.ssid = Some(ssid.clone());
            raw.messaging.port = Some(port);
            let config = raw.resolve("prop");
            prop_assert_eq!(config.network.ssid, ssid);
            prop_assert_eq!(config.messaging.port, port);
            prop_assert_eq!(config.network.password, DEFAULT_WIFI_PASSWORD);
        }
    }
}
