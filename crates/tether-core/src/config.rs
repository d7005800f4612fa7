//! Node configuration: the persisted credential set and the fixed timing
//! and protocol constants the agent runs with.

use core::fmt::{self, Write as _};

use heapless::String;

/// Store key holding the network identifier (SSID)
pub const KEY_NETWORK_ID: &str = "ssid";
/// Store key holding the network secret
pub const KEY_SECRET: &str = "pass";
/// Store key holding the broker address
pub const KEY_BROKER: &str = "broker";
/// Store key holding the publish topic
pub const KEY_TOPIC: &str = "topic";

/// Longest accepted network identifier, in bytes
pub const NETWORK_ID_MAX_LEN: usize = 31;
/// Longest accepted network secret, in bytes
pub const SECRET_MAX_LEN: usize = 63;
/// Longest accepted broker address, in bytes
pub const BROKER_MAX_LEN: usize = 63;
/// Longest accepted topic, in bytes
pub const TOPIC_MAX_LEN: usize = 63;

/// The broker is always reached on the plain MQTT port.
pub const MQTT_PORT: u16 = 1883;

const ENDPOINT_SCHEME: &str = "mqtt://";
const ENDPOINT_PORT_SUFFIX: &str = ":1883";

/// Capacity of a broker endpoint URI built from a [`BrokerAddress`]
pub const ENDPOINT_CAPACITY: usize =
    ENDPOINT_SCHEME.len() + BROKER_MAX_LEN + ENDPOINT_PORT_SUFFIX.len();

/// Serial console line settings (8N1)
pub const CONSOLE_BAUD_RATE: u32 = 115_200;

/// How long a link attempt may take before it is declared failed
pub const LINK_ATTEMPT_TIMEOUT_MS: u32 = 8_000;
/// Resolution at which link status is polled during an attempt
pub const LINK_POLL_INTERVAL_MS: u32 = 100;
/// Period of the steady-state publish loop
pub const PUBLISH_PERIOD_MS: u32 = 10_000;

pub type NetworkId = String<NETWORK_ID_MAX_LEN>;
pub type BrokerAddress = String<BROKER_MAX_LEN>;
pub type Topic = String<TOPIC_MAX_LEN>;
pub type Endpoint = String<ENDPOINT_CAPACITY>;

/// Timing parameters shared by the provisioning flow and the steady-state loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub link_timeout_ms: u32,
    pub link_poll_ms: u32,
    pub publish_period_ms: u32,
}

impl Timings {
    /// Number of status polls that fit in the link-attempt window
    pub const fn link_polls(&self) -> u32 {
        if self.link_poll_ms == 0 {
            0
        } else {
            self.link_timeout_ms / self.link_poll_ms
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            link_timeout_ms: LINK_ATTEMPT_TIMEOUT_MS,
            link_poll_ms: LINK_POLL_INTERVAL_MS,
            publish_period_ms: PUBLISH_PERIOD_MS,
        }
    }
}

/// Network secret. Kept out of `Debug` output so it never reaches a log line.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Secret(String<SECRET_MAX_LEN>);

impl Secret {
    pub const fn new(value: String<SECRET_MAX_LEN>) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Credentials used to bring the network link up
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkCredentials {
    pub id: NetworkId,
    pub secret: Secret,
}

/// The complete node configuration.
///
/// A configuration is complete only when all four fields are non-empty; the
/// store offers no grouping across keys, so completeness is re-checked on
/// every boot instead of being remembered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Configuration {
    pub network: NetworkCredentials,
    pub broker: BrokerAddress,
    pub topic: Topic,
}

impl Configuration {
    pub fn is_complete(&self) -> bool {
        !self.network.id.is_empty()
            && !self.network.secret.is_empty()
            && !self.broker.is_empty()
            && !self.topic.is_empty()
    }

    /// Broker endpoint URI for this configuration
    pub fn endpoint(&self) -> Endpoint {
        broker_endpoint(&self.broker)
    }
}

/// Build `mqtt://<broker>:1883`.
///
/// The port is fixed; a port typed into the broker field is not parsed and
/// simply becomes part of the host text.
pub fn broker_endpoint(broker: &BrokerAddress) -> Endpoint {
    let mut uri = Endpoint::new();
    // ENDPOINT_CAPACITY covers the scheme, the longest broker and the suffix.
    let _ = write!(uri, "{ENDPOINT_SCHEME}{broker}{ENDPOINT_PORT_SUFFIX}");
    uri
}

/// Split an endpoint URI back into host text and port.
///
/// Only the last `:` separates the port, so a port typed into the broker
/// field stays in the host text.
pub fn split_endpoint(endpoint: &str) -> Option<(&str, u16)> {
    let rest = endpoint.strip_prefix(ENDPOINT_SCHEME)?;
    let (host, port) = rest.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((host, port.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    fn config(id: &str, secret: &str, broker: &str, topic: &str) -> Configuration {
        Configuration {
            network: NetworkCredentials {
                id: NetworkId::from_str(id).unwrap(),
                secret: Secret::new(String::from_str(secret).unwrap()),
            },
            broker: BrokerAddress::from_str(broker).unwrap(),
            topic: Topic::from_str(topic).unwrap(),
        }
    }

    #[test]
    fn test_endpoint_uses_fixed_port() {
        let cfg = config("net1", "pw1", "10.0.0.5", "sensors/a");
        assert_eq!(cfg.endpoint().as_str(), "mqtt://10.0.0.5:1883");
    }

    #[test]
    fn test_endpoint_ignores_embedded_port() {
        let cfg = config("net1", "pw1", "broker.local:8883", "sensors/a");
        assert_eq!(cfg.endpoint().as_str(), "mqtt://broker.local:8883:1883");
    }

    #[test]
    fn test_endpoint_fits_longest_broker() {
        let broker = "b".repeat(BROKER_MAX_LEN);
        let cfg = config("net1", "pw1", &broker, "t");
        assert_eq!(cfg.endpoint().len(), ENDPOINT_CAPACITY);
    }

    #[test]
    fn test_split_endpoint() {
        assert_eq!(split_endpoint("mqtt://10.0.0.5:1883"), Some(("10.0.0.5", MQTT_PORT)));
        assert_eq!(
            split_endpoint("mqtt://broker.local:8883:1883"),
            Some(("broker.local:8883", MQTT_PORT))
        );
        assert_eq!(split_endpoint("http://10.0.0.5:1883"), None);
        assert_eq!(split_endpoint("mqtt://:1883"), None);
        assert_eq!(split_endpoint("mqtt://10.0.0.5"), None);
    }

    #[test]
    fn test_completeness_requires_every_field() {
        assert!(config("net1", "pw1", "10.0.0.5", "sensors/a").is_complete());
        assert!(!config("", "pw1", "10.0.0.5", "sensors/a").is_complete());
        assert!(!config("net1", "", "10.0.0.5", "sensors/a").is_complete());
        assert!(!config("net1", "pw1", "", "sensors/a").is_complete());
        assert!(!config("net1", "pw1", "10.0.0.5", "").is_complete());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let cfg = config("net1", "hunter22", "10.0.0.5", "sensors/a");
        let rendered = std::format!("{:?}", cfg);
        assert!(!rendered.contains("hunter22"));
        assert!(rendered.contains("net1"));
    }

    #[test]
    fn test_default_timings() {
        let timings = Timings::default();
        assert_eq!(timings.link_polls(), 80);
        assert_eq!(timings.publish_period_ms, 10_000);
    }
}
