//! Connection configuration (spec ss4.5, SPEC_FULL.md ambient stack).
//! Mirrors the connection configuration keys and defaults from
//! `iMQConstants.hpp`, surfaced as a typed builder instead of a string
//! property bag.

use std::time::Duration;

use mq_protocol::constants::{
    DEFAULT_ACK_ON_ACKNOWLEDGE, DEFAULT_ACK_ON_NON_PERSISTENT_PRODUCE,
    DEFAULT_ACK_ON_PERSISTENT_PRODUCE, DEFAULT_ACK_TIMEOUT_MICROS,
    DEFAULT_CONNECTION_FLOW_COUNT, DEFAULT_CONNECTION_FLOW_LIMIT,
    DEFAULT_CONNECTION_FLOW_LIMIT_ENABLED, DEFAULT_CONNECT_TIMEOUT_MICROS,
    DEFAULT_CONSUMER_PREFETCH_MAX_MESSAGE_COUNT, DEFAULT_CONSUMER_PREFETCH_THRESHOLD_PERCENT,
    DEFAULT_DUPS_OK_LIMIT, DEFAULT_PING_INTERVAL_SEC, DEFAULT_PORTMAPPER_SERVICE_NAME,
    DEFAULT_READ_PORTMAPPER_TIMEOUT_MICROS, DEFAULT_SSL_BROKER_IS_TRUSTED,
    DEFAULT_SSL_CHECK_BROKER_FINGERPRINT, DEFAULT_WRITE_TIMEOUT_MICROS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Tcp,
    Tls,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub connection_type: ConnectionType,
    pub enable_ipv6: bool,

    pub connect_timeout: Duration,
    pub ack_timeout: Duration,
    pub write_timeout: Duration,
    pub ping_interval: Duration,

    /// Whether `host`/`port` name a portmapper bootstrap port to resolve
    /// before connecting (spec ss4.2, ss6's "read-portmapper timeout" key)
    /// rather than the broker's service port directly. Off by default: most
    /// callers, including this crate's own test broker, speak the wire
    /// protocol directly on a concrete port with no portmapper in front of
    /// it (see DESIGN.md).
    pub use_portmapper: bool,
    pub read_portmapper_timeout: Duration,
    pub portmapper_service_name: String,

    pub ack_on_persistent_produce: bool,
    pub ack_on_non_persistent_produce: bool,
    pub ack_on_acknowledge: bool,
    pub dups_ok_limit: usize,

    pub connection_flow_limit_enabled: bool,
    pub connection_flow_limit: i32,
    pub connection_flow_count: i32,

    pub consumer_prefetch_max_message_count: i32,
    pub consumer_prefetch_threshold_percent: f64,

    pub ssl_is_broker_trusted: bool,
    pub ssl_check_broker_fingerprint: bool,
    pub ssl_broker_cert_fingerprint: Option<String>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ConnectionConfig {
            host: host.into(),
            port,
            connection_type: ConnectionType::Tcp,
            enable_ipv6: false,
            connect_timeout: Duration::from_micros(DEFAULT_CONNECT_TIMEOUT_MICROS),
            ack_timeout: micros_or_none(DEFAULT_ACK_TIMEOUT_MICROS),
            write_timeout: micros_or_none(DEFAULT_WRITE_TIMEOUT_MICROS),
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SEC),
            use_portmapper: false,
            read_portmapper_timeout: Duration::from_micros(DEFAULT_READ_PORTMAPPER_TIMEOUT_MICROS),
            portmapper_service_name: DEFAULT_PORTMAPPER_SERVICE_NAME.to_string(),
            ack_on_persistent_produce: DEFAULT_ACK_ON_PERSISTENT_PRODUCE,
            ack_on_non_persistent_produce: DEFAULT_ACK_ON_NON_PERSISTENT_PRODUCE,
            ack_on_acknowledge: DEFAULT_ACK_ON_ACKNOWLEDGE,
            dups_ok_limit: DEFAULT_DUPS_OK_LIMIT,
            connection_flow_limit_enabled: DEFAULT_CONNECTION_FLOW_LIMIT_ENABLED,
            connection_flow_limit: DEFAULT_CONNECTION_FLOW_LIMIT,
            connection_flow_count: DEFAULT_CONNECTION_FLOW_COUNT,
            consumer_prefetch_max_message_count: DEFAULT_CONSUMER_PREFETCH_MAX_MESSAGE_COUNT,
            consumer_prefetch_threshold_percent: DEFAULT_CONSUMER_PREFETCH_THRESHOLD_PERCENT,
            ssl_is_broker_trusted: DEFAULT_SSL_BROKER_IS_TRUSTED,
            ssl_check_broker_fingerprint: DEFAULT_SSL_CHECK_BROKER_FINGERPRINT,
            ssl_broker_cert_fingerprint: None,
        }
    }

    pub fn with_tls(mut self) -> Self {
        self.connection_type = ConnectionType::Tls;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// A ping interval of zero disables the ping thread entirely (spec
    /// ss4.9: "optionally one ping thread").
    pub fn ping_enabled(&self) -> bool {
        !self.ping_interval.is_zero()
    }

    /// Treats `host`/`port` as a portmapper bootstrap address: `connect`
    /// resolves the real service port through it before opening the
    /// connection transport (spec ss4.2).
    pub fn with_portmapper(mut self, service_name: impl Into<String>) -> Self {
        self.use_portmapper = true;
        self.portmapper_service_name = service_name.into();
        self
    }

    pub fn with_read_portmapper_timeout(mut self, timeout: Duration) -> Self {
        self.read_portmapper_timeout = timeout;
        self
    }
}

fn micros_or_none(micros: u64) -> Duration {
    Duration::from_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_constants() {
        let cfg = ConnectionConfig::new("localhost", 7676);
        assert_eq!(cfg.connection_type, ConnectionType::Tcp);
        assert_eq!(cfg.ping_interval, Duration::from_secs(30));
        assert!(cfg.ping_enabled());
        assert!(!cfg.connection_flow_limit_enabled);
        assert_eq!(cfg.consumer_prefetch_max_message_count, -1);
        assert!(!cfg.use_portmapper);
    }

    #[test]
    fn with_portmapper_enables_lookup_with_named_service() {
        let cfg = ConnectionConfig::new("localhost", 7676).with_portmapper("jms");
        assert!(cfg.use_portmapper);
        assert_eq!(cfg.portmapper_service_name, "jms");
    }

    #[test]
    fn zero_ping_interval_disables_ping_thread() {
        let cfg = ConnectionConfig::new("localhost", 7676).with_ping_interval(Duration::ZERO);
        assert!(!cfg.ping_enabled());
    }
}
