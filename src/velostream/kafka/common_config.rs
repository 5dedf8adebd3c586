//! Defaults shared by every consumer and producer

use super::client::Properties;

pub const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";
pub const GROUP_ID: &str = "group.id";
pub const AUTO_OFFSET_RESET: &str = "auto.offset.reset";
pub const ENABLE_AUTO_COMMIT: &str = "enable.auto.commit";
pub const MAX_POLL_RECORDS: &str = "max.poll.records";

/// Prefix of generated consumer group ids
pub const GROUP_ID_PREFIX: &str = "velostream";

/// Overrides the IP family librdkafka resolves broker hosts to
pub const BROKER_ADDRESS_FAMILY_ENV: &str = "VELOSTREAM_BROKER_ADDRESS_FAMILY";

/// `broker.address.family` applied when the properties leave it unset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerAddressFamily {
    /// Containers usually listen on IPv4 only while `localhost` may
    /// resolve to `::1` first
    #[default]
    V4,
    V6,
    /// librdkafka's own default; nothing is set
    Any,
}

impl BrokerAddressFamily {
    /// Lenient parse: unknown names fall back to `V4` with a warning
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "v4" | "ipv4" => BrokerAddressFamily::V4,
            "v6" | "ipv6" => BrokerAddressFamily::V6,
            "any" | "both" => BrokerAddressFamily::Any,
            other => {
                log::warn!(
                    "Ignoring {}='{}' (expected v4, v6 or any); using v4",
                    BROKER_ADDRESS_FAMILY_ENV,
                    other
                );
                BrokerAddressFamily::V4
            }
        }
    }

    /// The librdkafka value, `None` when librdkafka's default should stand
    pub fn config_value(self) -> Option<&'static str> {
        match self {
            BrokerAddressFamily::V4 => Some("v4"),
            BrokerAddressFamily::V6 => Some("v6"),
            BrokerAddressFamily::Any => None,
        }
    }

    pub fn from_env() -> Self {
        std::env::var(BROKER_ADDRESS_FAMILY_ENV)
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }
}

/// Library consumer defaults: read from the earliest offset and commit
/// positions automatically.
pub fn consumer_defaults(bootstrap_servers: &str, group_id: &str) -> Properties {
    Properties::from([
        (BOOTSTRAP_SERVERS.to_string(), bootstrap_servers.to_string()),
        (GROUP_ID.to_string(), group_id.to_string()),
        (AUTO_OFFSET_RESET.to_string(), "earliest".to_string()),
        (ENABLE_AUTO_COMMIT.to_string(), "true".to_string()),
    ])
}

/// Library producer defaults
pub fn producer_defaults(bootstrap_servers: &str) -> Properties {
    Properties::from([(BOOTSTRAP_SERVERS.to_string(), bootstrap_servers.to_string())])
}

/// A consumer group id no other consumer in this or any other process uses
pub fn generate_group_id() -> String {
    format!("{}-{}", GROUP_ID_PREFIX, uuid::Uuid::new_v4())
}
